//! Strategy Engine
//!
//! Wraps an upstream [`Source`] with a caching layer in front of a
//! [`StoreClient`]. The engine is itself a `Source`, so callers cannot tell
//! a cached producer from a plain one.
//!
//! ```text
//!            ┌─────────── KeyResolver ──────────┐
//!   get(id) ─┤                                  ├─► strategy ─► answer
//!            └─ BackpressureGuard ─► StoreClient┘      │
//!                                                      └─► background writes
//!                                                          (TaskTracker)
//! ```
//!
//! Store-side failures never reach the caller. They go to the
//! [`ErrorReporter`] and the request falls back to the upstream.

mod metrics;
mod passthrough;
mod race;
mod relay;

pub use metrics::{EngineMetrics, MetricsSnapshot};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, Instrument};

use crate::adapters::{RedisStore, SystemClock, TracingReporter};
use crate::backpressure::BackpressureGuard;
use crate::cluster::ClusterRouter;
use crate::config::{CacheMode, EngineConfig};
use crate::domain::events::CacheEvent;
use crate::domain::ports::{Clock, ErrorReporter, FetchResult, Source, StoreClient};
use crate::envelope::{EnvelopeCodec, StatusExtractor};
use crate::error::Result;
use crate::expiry::{ExpiryRules, KeyResolver};

/// Store address used when neither `redis_url` nor `cluster_nodes` is set.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Outcome of reading a key from the store.
pub(crate) enum Lookup {
    /// Decoded entry plus the raw stored bytes
    Hit(FetchResult, Bytes),
    /// Absent or undecodable
    Miss,
    /// The store read itself failed
    Failed,
}

/// State shared by the engine handle and its background tasks.
pub(crate) struct EngineInner {
    pub(crate) mode: CacheMode,
    pub(crate) source: Arc<dyn Source>,
    pub(crate) store: Arc<dyn StoreClient>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) resolver: KeyResolver,
    pub(crate) guard: BackpressureGuard,
    pub(crate) codec: EnvelopeCodec,
    pub(crate) metrics: EngineMetrics,
    pub(crate) tasks: TaskTracker,
}

impl EngineInner {
    /// Backpressure check. Reports and counts a bypass when refused.
    pub(crate) fn admit(&self, key: &str) -> bool {
        match self.guard.admit(self.store.as_ref(), key) {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %key, error = %e, "Bypassing store");
                self.metrics.record_bypass();
                self.report(CacheEvent::high_water_mark(key, &e));
                false
            }
        }
    }

    /// Hand an absorbed failure to the reporter, stamped by the engine clock.
    fn report(&self, event: CacheEvent) {
        self.reporter.report(event.at(self.clock.now()));
    }

    pub(crate) async fn fetch(&self, resource_id: &str) -> FetchResult {
        self.metrics.record_upstream_fetch();
        self.source.fetch(resource_id).await
    }

    pub(crate) async fn lookup(&self, key: &str) -> Lookup {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                self.metrics.record_store_error();
                self.report(CacheEvent::store_read(key, &e));
                return Lookup::Failed;
            }
        };

        match self.codec.decode(&raw) {
            Ok(result) => Lookup::Hit(result, raw),
            Err(e) => {
                if e.is_corrupt_value() {
                    debug!(key = %key, "Corrupt entry, treating as a miss");
                }
                self.metrics.record_store_error();
                self.report(CacheEvent::decode(key, &e));
                Lookup::Miss
            }
        }
    }

    /// Encode for storage. `None` when the result must not be cached or
    /// could not be encoded.
    pub(crate) fn encode(&self, key: &str, result: &FetchResult) -> Option<Bytes> {
        match self.codec.encode(result) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_store_error();
                self.report(CacheEvent::encode(key, &e));
                None
            }
        }
    }

    pub(crate) async fn write(&self, key: &str, value: Bytes, ttl_seconds: u64) {
        if ttl_seconds == 0 {
            debug!(key = %key, "Zero lifetime, skipping store write");
            return;
        }
        match self.store.set_with_expiry(key, value, ttl_seconds).await {
            Ok(()) => {
                self.metrics.record_store_write();
                debug!(key = %key, ttl = ttl_seconds, "Stored entry");
            }
            Err(e) => {
                self.metrics.record_store_error();
                self.report(CacheEvent::store_write(key, &e));
            }
        }
    }

    /// Run `fut` in the background, keeping the current span.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(fut.in_current_span());
    }
}

/// Caching wrapper around an upstream source.
///
/// Cheap to clone; clones share the store, counters and background tasks.
#[derive(Clone)]
pub struct CachingEngine {
    inner: Arc<EngineInner>,
}

impl CachingEngine {
    pub fn builder<S, C>(source: S, store: C) -> CachingEngineBuilder
    where
        S: Source + 'static,
        C: StoreClient + 'static,
    {
        CachingEngineBuilder::new(Arc::new(source), Arc::new(store))
    }

    /// Connect the store described by `config` and build an engine on it.
    pub async fn connect<S>(config: EngineConfig, source: S) -> Result<Self>
    where
        S: Source + 'static,
    {
        config.validate()?;
        let store = connect_store(&config).await?;
        CachingEngineBuilder::new(Arc::new(source), store)
            .config(config)
            .build()
    }

    /// Fetch `resource_id` through the configured strategy.
    ///
    /// The result is exactly what the upstream produced, either fresh or
    /// replayed from the store. Store failures are never returned here.
    #[instrument(skip(self), fields(mode = %self.inner.mode))]
    pub async fn get(&self, resource_id: &str) -> FetchResult {
        self.inner.metrics.record_request();
        let resolution = self.inner.resolver.resolve(resource_id);

        match self.inner.mode {
            CacheMode::Passthrough => {
                passthrough::run(&self.inner, resource_id, resolution).await
            }
            CacheMode::Race => race::run(&self.inner, resource_id, resolution).await,
            CacheMode::Relay => relay::run(&self.inner, resource_id, resolution).await,
        }
    }

    /// Wait for every background write and refresh issued so far.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Drop every entry in the store (all nodes in cluster mode).
    pub async fn flush(&self) -> Result<()> {
        self.inner.store.flush_all().await?;
        info!(store = %self.inner.store.name(), "Flushed store");
        Ok(())
    }

    /// Store key used for `resource_id`.
    pub fn key_for(&self, resource_id: &str) -> String {
        self.inner.resolver.key(resource_id)
    }

    pub fn mode(&self) -> CacheMode {
        self.inner.mode
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Background tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }
}

impl std::fmt::Debug for CachingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingEngine")
            .field("mode", &self.inner.mode)
            .field("namespace", &self.inner.resolver.namespace())
            .field("store", &self.inner.store.name())
            .finish()
    }
}

#[async_trait]
impl Source for CachingEngine {
    async fn fetch(&self, resource_id: &str) -> FetchResult {
        self.get(resource_id).await
    }
}

/// Store client for a configuration: a cluster router when nodes are
/// listed, a single Redis connection otherwise.
pub async fn connect_store(config: &EngineConfig) -> Result<Arc<dyn StoreClient>> {
    if !config.cluster_nodes.is_empty() {
        let router = ClusterRouter::connect(&config.cluster_nodes, config.ring_replicas).await?;
        return Ok(Arc::new(router));
    }

    let url = config.redis_url.as_deref().unwrap_or(DEFAULT_REDIS_URL);
    Ok(Arc::new(RedisStore::connect(url).await?))
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`CachingEngine`].
pub struct CachingEngineBuilder {
    source: Arc<dyn Source>,
    store: Arc<dyn StoreClient>,
    config: EngineConfig,
    reporter: Option<Arc<dyn ErrorReporter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CachingEngineBuilder {
    pub fn new(source: Arc<dyn Source>, store: Arc<dyn StoreClient>) -> Self {
        Self {
            source,
            store,
            config: EngineConfig::default(),
            reporter: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where absorbed store failures go. Defaults to a [`TracingReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<CachingEngine> {
        let config = self.config;
        config.validate()?;

        let resolver = KeyResolver::new(
            config.namespace.clone(),
            ExpiryRules::from_setting(&config.ttl)?,
            ExpiryRules::from_setting(&config.stale)?,
            config.discriminator,
        );
        let codec = EnvelopeCodec::new(StatusExtractor::new(config.status_fields.iter()));

        info!(
            mode = %config.mode,
            namespace = %config.namespace,
            store = %self.store.name(),
            "Built caching engine"
        );

        Ok(CachingEngine {
            inner: Arc::new(EngineInner {
                mode: config.mode,
                source: self.source,
                store: self.store,
                reporter: self
                    .reporter
                    .unwrap_or_else(|| Arc::new(TracingReporter::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                resolver,
                guard: BackpressureGuard::new(config.high_water_mark),
                codec,
                metrics: EngineMetrics::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }
}

// =============================================================================
// Test support
// =============================================================================
