//! Domain Layer
//!
//! Value objects and port traits the caching engine is written against.
//!
//! - **Ports** (`ports.rs`) - `Source`, `StoreClient`, `ErrorReporter`, `Clock`
//! - **Events** (`events.rs`) - absorbed store-side failures
//!
//! # Usage
//!
//! ```ignore
//! use cachefront::domain::ports::{source_fn, Response};
//!
//! let source = source_fn(|id: String| async move {
//!     Ok(Response::new(format!("body of {id}")))
//! });
//! ```

pub mod events;
pub mod ports;

pub use events::{CacheEvent, CacheEventKind};
pub use ports::{
    header, source_fn, Clock, ErrorReporter, FetchResult, FnSource, Headers, Payload, Response,
    Source, SourceError, StoreClient, StoreLoad,
};
