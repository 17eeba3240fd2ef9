//! Cluster Router
//!
//! Shards cache traffic over several store nodes. The router is itself a
//! `StoreClient`, so the engine cannot tell it apart from a single node:
//!
//! ```text
//!   get / set_with_expiry ──► HashRing::route(key) ──► node[i]
//!   flush_all ──────────────► every node, joined
//!   load_for(key) ──────────► load of node[i]
//! ```

pub mod ring;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, warn};

pub use ring::{ring_hash, HashRing};

use crate::adapters::RedisStore;
use crate::domain::ports::{StoreClient, StoreLoad};
use crate::error::Result;

/// Consistent-hash router over a fixed node set.
pub struct ClusterRouter {
    ring: HashRing,
    clients: Vec<Arc<dyn StoreClient>>,
}

impl ClusterRouter {
    /// Build from named clients. Names place the nodes on the ring.
    pub fn new(nodes: Vec<(String, Arc<dyn StoreClient>)>, replicas: usize) -> Result<Self> {
        let (names, clients): (Vec<_>, Vec<_>) = nodes.into_iter().unzip();
        let ring = HashRing::new(names, replicas)?;
        info!(nodes = clients.len(), tokens = ring.token_count(), "Built cluster router");
        Ok(Self { ring, clients })
    }

    /// Connect a Redis client per address.
    pub async fn connect(addresses: &[String], replicas: usize) -> Result<Self> {
        let mut nodes = Vec::with_capacity(addresses.len());
        for address in addresses {
            let store = RedisStore::connect(address).await?;
            nodes.push((address.clone(), Arc::new(store) as Arc<dyn StoreClient>));
        }
        Self::new(nodes, replicas)
    }

    /// Node that owns `key`.
    pub fn route(&self, key: &str) -> &Arc<dyn StoreClient> {
        &self.clients[self.ring.route(key)]
    }

    /// Name of the node that owns `key`.
    pub fn route_name(&self, key: &str) -> &str {
        self.ring.route_name(key)
    }

    pub fn nodes(&self) -> &[String] {
        self.ring.nodes()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ClusterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRouter")
            .field("nodes", &self.ring.nodes())
            .finish()
    }
}

#[async_trait]
impl StoreClient for ClusterRouter {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        debug!(key = %key, node = %self.route_name(key), "Routing get");
        self.route(key).get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()> {
        debug!(key = %key, node = %self.route_name(key), "Routing set");
        self.route(key).set_with_expiry(key, value, ttl_seconds).await
    }

    /// Flush every node. Completes once all nodes have answered; individual
    /// node failures are logged and do not fail the aggregate.
    async fn flush_all(&self) -> Result<()> {
        let results = join_all(self.clients.iter().map(|c| c.flush_all())).await;
        for (name, result) in self.ring.nodes().iter().zip(results) {
            if let Err(e) = result {
                warn!(node = %name, error = %e, "Flush failed on node");
            }
        }
        Ok(())
    }

    fn pending_operations(&self) -> usize {
        self.clients.iter().map(|c| c.pending_operations()).sum()
    }

    fn high_water_mark(&self) -> usize {
        self.clients
            .iter()
            .map(|c| c.high_water_mark())
            .min()
            .unwrap_or(0)
    }

    fn load_for(&self, key: &str) -> StoreLoad {
        self.route(key).load_for(key)
    }

    fn name(&self) -> &str {
        "cluster"
    }
}

// =============================================================================
// Tests
// =============================================================================
