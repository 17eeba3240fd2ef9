//! In-Memory Store
//!
//! `StoreClient` backed by a DashMap, for tests and local development.
//! Entries expire according to the injected clock, so relay behavior can be
//! exercised without sleeping.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::clock::SystemClock;
use crate::domain::ports::{Clock, StoreClient};
use crate::error::{Error, Result};

/// Default backpressure threshold, matching common Redis client defaults.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: DateTime<Utc>,
    ttl_seconds: u64,
}

/// Operation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub reads: u64,
    pub writes: u64,
    pub flushes: u64,
    pub entries: usize,
}

/// In-memory `StoreClient`
pub struct InMemoryStore {
    name: String,
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
    pending: Arc<AtomicUsize>,
    high_water_mark: usize,
    latency: Option<Duration>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_flushes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    flushes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            entries: DashMap::new(),
            clock: Arc::new(SystemClock),
            pending: Arc::new(AtomicUsize::new(0)),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            latency: None,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_flushes: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_high_water_mark(mut self, limit: usize) -> Self {
        self.high_water_mark = limit;
        self
    }

    /// Delay every operation, simulating a remote round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every `get` fail until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make every `set_with_expiry` fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make every `flush_all` fail until switched off.
    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::Relaxed);
    }

    /// Count one pending operation until the returned guard is dropped.
    pub fn hold_pending(&self) -> PendingGuard {
        PendingGuard::new(self.pending.clone())
    }

    /// Raw stored bytes, ignoring expiry.
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|v| v.data.clone())
    }

    /// TTL the entry was last written with.
    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|v| v.ttl_seconds)
    }

    /// Insert without going through the client contract.
    pub fn insert_raw(&self, key: impl Into<String>, data: Bytes, ttl_seconds: u64) {
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(
            key.into(),
            StoredValue {
                data,
                expires_at,
                ttl_seconds,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let _pending = self.hold_pending();
        self.simulate_latency().await;
        self.reads.fetch_add(1, Ordering::Relaxed);

        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::Store(format!("{}: connection refused", self.name)));
        }

        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(value) if value.expires_at > now => return Ok(Some(value.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, v| v.expires_at <= now);
        }
        Ok(None)
    }

    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()> {
        let _pending = self.hold_pending();
        self.simulate_latency().await;
        self.writes.fetch_add(1, Ordering::Relaxed);

        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Store(format!("{}: connection refused", self.name)));
        }
        if ttl_seconds == 0 {
            return Err(Error::Store("invalid expire time in 'setex' command".to_string()));
        }

        self.insert_raw(key, value, ttl_seconds);
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        let _pending = self.hold_pending();
        self.simulate_latency().await;
        self.flushes.fetch_add(1, Ordering::Relaxed);

        if self.fail_flushes.load(Ordering::Relaxed) {
            return Err(Error::Store(format!("{}: connection refused", self.name)));
        }
        self.entries.clear();
        Ok(())
    }

    fn pending_operations(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decrements a pending-operation counter when dropped.
#[derive(Debug)]
pub struct PendingGuard {
    counter: Arc<AtomicUsize>,
}

impl PendingGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================
