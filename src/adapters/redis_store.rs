//! Redis Store Adapter
//!
//! `StoreClient` over a multiplexed, auto-reconnecting Redis connection.
//! Pending operations are counted locally so the backpressure guard can see
//! how far behind the connection is.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::memory_store::{PendingGuard, DEFAULT_HIGH_WATER_MARK};
use crate::domain::ports::StoreClient;
use crate::error::Result;

/// Redis-backed `StoreClient`
#[derive(Clone)]
pub struct RedisStore {
    name: String,
    conn: ConnectionManager,
    pending: Arc<AtomicUsize>,
    high_water_mark: usize,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis");

        Ok(Self {
            name: url.to_string(),
            conn,
            pending: Arc::new(AtomicUsize::new(0)),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        })
    }

    pub fn with_high_water_mark(mut self, limit: usize) -> Self {
        self.high_water_mark = limit;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("name", &self.name)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("high_water_mark", &self.high_water_mark)
            .finish()
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let _pending = PendingGuard::new(self.pending.clone());
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        debug!(key = %key, hit = value.is_some(), "Redis GET");
        Ok(value.map(Bytes::from))
    }

    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()> {
        let _pending = PendingGuard::new(self.pending.clone());
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, &value[..], ttl_seconds).await?;
        debug!(key = %key, ttl = ttl_seconds, "Redis SETEX");
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        let _pending = PendingGuard::new(self.pending.clone());
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        info!(store = %self.name, "Flushed Redis database");
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
