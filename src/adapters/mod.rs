//! Adapters (Implementations of Domain Ports)
//!
//! Concrete implementations of the traits in `domain::ports`:
//!
//! - `HttpSource`: upstream over HTTP
//! - `RedisStore`: Redis-backed store client
//! - `InMemoryStore`: DashMap-backed store client for tests and local runs
//! - Reporters: tracing, collecting, channel and composite sinks
//! - Clocks: wall clock and a manually driven one

pub mod clock;
pub mod event_reporter;
pub mod http_source;
pub mod memory_store;
pub mod redis_store;

pub use clock::{ManualClock, SystemClock};
pub use event_reporter::{ChannelReporter, CollectingReporter, CompositeReporter, TracingReporter};
pub use http_source::{HttpSource, HttpSourceConfig};
pub use memory_store::{InMemoryStore, MemoryStoreStats, PendingGuard, DEFAULT_HIGH_WATER_MARK};
pub use redis_store::RedisStore;
