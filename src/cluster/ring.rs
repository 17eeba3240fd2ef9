//! Consistent Hash Ring
//!
//! Each node is placed on a 64-bit ring as `replicas` virtual tokens. A key
//! belongs to the node owning the first token at or after the key's hash,
//! wrapping past the end of the ring.

use crate::error::{Error, Result};

/// Fast non-cryptographic hash with a full-avalanche finalizer.
///
/// FxHash alone clusters short, similar tokens ("node-1", "node-2", ...);
/// the murmur3 fmix64 step spreads them over the ring.
#[inline]
pub fn ring_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    fmix64(hash)
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Token {
    hash: u64,
    node: usize,
}

/// Sorted ring of virtual node tokens.
///
/// Built once; immutable afterwards.
#[derive(Debug, Clone)]
pub struct HashRing {
    nodes: Vec<String>,
    tokens: Vec<Token>,
}

impl HashRing {
    pub fn new<I, S>(nodes: I, replicas: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        if nodes.is_empty() {
            return Err(Error::Config("hash ring needs at least one node".into()));
        }
        if replicas == 0 {
            return Err(Error::Config("hash ring needs at least one replica per node".into()));
        }

        let mut tokens = Vec::with_capacity(nodes.len() * replicas);
        for (index, name) in nodes.iter().enumerate() {
            for replica in 0..replicas {
                let token = format!("{}-{}", name, replica);
                tokens.push(Token {
                    hash: ring_hash(token.as_bytes()),
                    node: index,
                });
            }
        }
        tokens.sort_unstable();

        Ok(Self { nodes, tokens })
    }

    /// Index of the node owning `key`.
    pub fn route(&self, key: &str) -> usize {
        let hash = ring_hash(key.as_bytes());
        let at = self.tokens.partition_point(|t| t.hash < hash);
        // past the last token wraps to the first
        self.tokens
            .get(at)
            .or_else(|| self.tokens.first())
            .map(|t| t.node)
            .unwrap_or(0)
    }

    /// Name of the node owning `key`.
    pub fn route_name(&self, key: &str) -> &str {
        &self.nodes[self.route(key)]
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
