//! Cachefront - Caching Strategy Engine
//!
//! Puts a shared key-value store (Redis, or a consistent-hash cluster of
//! Redis nodes) in front of any upstream resource producer.
//!
//! # Architecture
//!
//! ```text
//! caller ─► CachingEngine ─┬─► KeyResolver      (key, ttl, stale)
//!                          ├─► BackpressureGuard (store has room?)
//!                          ├─► EnvelopeCodec     (1024 B header slot + payload)
//!                          ├─► StoreClient       (RedisStore | ClusterRouter)
//!                          └─► Source            (upstream producer)
//! ```
//!
//! Three strategies are available, selected at construction:
//!
//! - **passthrough**: read the store, fall back to the upstream on a miss
//! - **race**: query both at once, first answer wins, write back differences
//! - **relay**: stale-while-revalidate with an explicit freshness deadline
//!
//! # Modules
//!
//! - [`adapters`] - Store, source, reporter and clock implementations
//! - [`backpressure`] - High-water-mark guard
//! - [`cluster`] - Consistent-hash store router
//! - [`config`] - Engine configuration
//! - [`domain`] - Ports and events
//! - [`engine`] - Strategy engine
//! - [`envelope`] - Store value codec
//! - [`error`] - Error types
//! - [`expiry`] - Key and expiry resolution

pub mod adapters;
pub mod backpressure;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod expiry;

// Re-export commonly used types
pub use adapters::{
    ChannelReporter, CollectingReporter, CompositeReporter, HttpSource, HttpSourceConfig,
    InMemoryStore, ManualClock, RedisStore, SystemClock, TracingReporter,
};
pub use backpressure::BackpressureGuard;
pub use cluster::{ClusterRouter, HashRing};
pub use config::{CacheMode, EngineConfig, ExpirySetting};
pub use domain::{
    source_fn, CacheEvent, CacheEventKind, Clock, ErrorReporter, FetchResult, Headers, Payload,
    Response, Source, SourceError, StoreClient,
};
pub use engine::{CachingEngine, CachingEngineBuilder, MetricsSnapshot};
pub use envelope::{EnvelopeCodec, StatusExtractor};
pub use error::{Error, Result};
pub use expiry::{Discriminator, KeyResolver};
