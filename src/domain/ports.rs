//! Domain Ports (Port/Adapter Pattern)
//!
//! The caching engine depends on three outside collaborators and reaches
//! each of them only through the traits defined here:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caching Engine                          │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │    Source │ StoreClient │ ErrorReporter │ Clock      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Adapters                              │
//! │  HttpSource │ RedisStore │ InMemoryStore │ ClusterRouter    │
//! │  TracingReporter │ CollectingReporter │ SystemClock         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::events::CacheEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Response metadata. Keys are header names, values are JSON scalars.
pub type Headers = serde_json::Map<String, Value>;

/// Outcome of a fetch, either from the upstream or replayed from the store.
pub type FetchResult = std::result::Result<Response, SourceError>;

/// Look up a header by name, ignoring ASCII case.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a Value> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes
    Bytes(Bytes),
    /// UTF-8 text, stored as raw bytes
    Text(String),
    /// Structured value, stored as JSON and flagged so it decodes back
    Json(Value),
}

impl Payload {
    /// Borrow the payload as raw bytes, when it has a byte form already.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b.as_ref()),
            Payload::Text(s) => Some(s.as_bytes()),
            Payload::Json(_) => None,
        }
    }

    /// Borrow the structured value, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(v: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(v))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

/// A successful fetch: payload plus headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub payload: Payload,
    pub headers: Headers,
}

impl Response {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// True when this response was replayed from the store.
    pub fn is_cache_hit(&self) -> bool {
        self.headers.contains_key(crate::envelope::HEADER_HIT)
    }
}

/// Failure reported by an upstream producer.
///
/// Producers disagree on where they put a status code (`status`, `code`,
/// `statusCode`, ...), so the error keeps an open attribute map and the
/// engine reads it through a configurable [`StatusExtractor`].
///
/// [`StatusExtractor`]: crate::envelope::StatusExtractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceError {
    message: String,
    attributes: serde_json::Map<String, Value>,
    headers: Headers,
    cached: bool,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach an arbitrary attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attach a numeric status under the given field name.
    pub fn with_status(self, field: &str, code: u16) -> Self {
        self.with_attribute(field, code)
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Synthetic error replayed from a cached marker.
    pub(crate) fn replayed(code: u16, fields: &[String], headers: Headers) -> Self {
        let mut err = Self {
            headers,
            cached: true,
            ..Default::default()
        };
        for field in fields {
            err.attributes.insert(field.clone(), Value::from(code));
        }
        err
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Read an attribute as a status code. Numeric strings are accepted.
    pub fn status_in(&self, field: &str) -> Option<u16> {
        match self.attributes.get(field)? {
            Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// True when this error was replayed from the store rather than the upstream.
    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "Error")
        } else {
            write!(f, "Error: {}", self.message)
        }
    }
}

impl std::error::Error for SourceError {}

// =============================================================================
// Source Port
// =============================================================================

/// Upstream producer of resources.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch a resource by id.
    async fn fetch(&self, resource_id: &str) -> FetchResult;
}

/// Adapter turning an async closure into a [`Source`].
pub struct FnSource<F> {
    f: F,
}

/// Wrap an async closure as a [`Source`].
pub fn source_fn<F, Fut>(f: F) -> FnSource<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult> + Send,
{
    FnSource { f }
}

#[async_trait]
impl<F, Fut> Source for FnSource<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult> + Send,
{
    async fn fetch(&self, resource_id: &str) -> FetchResult {
        (self.f)(resource_id.to_string()).await
    }
}

#[async_trait]
impl<S: Source + ?Sized> Source for Arc<S> {
    async fn fetch(&self, resource_id: &str) -> FetchResult {
        (**self).fetch(resource_id).await
    }
}

// =============================================================================
// Store Port
// =============================================================================

/// Pending-load reading used by the backpressure guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLoad {
    pub pending: usize,
    pub high_water_mark: usize,
}

/// Remote key-value store holding encoded envelopes.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value that expires after `ttl_seconds`.
    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()>;

    /// Drop every key.
    async fn flush_all(&self) -> Result<()>;

    /// Operations issued but not yet completed.
    fn pending_operations(&self) -> usize;

    /// Threshold above which the client should not be given more work.
    fn high_water_mark(&self) -> usize;

    /// Load of whichever backend would serve `key`.
    fn load_for(&self, _key: &str) -> StoreLoad {
        StoreLoad {
            pending: self.pending_operations(),
            high_water_mark: self.high_water_mark(),
        }
    }

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<S: StoreClient + ?Sized> StoreClient for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl_seconds: u64) -> Result<()> {
        (**self).set_with_expiry(key, value, ttl_seconds).await
    }

    async fn flush_all(&self) -> Result<()> {
        (**self).flush_all().await
    }

    fn pending_operations(&self) -> usize {
        (**self).pending_operations()
    }

    fn high_water_mark(&self) -> usize {
        (**self).high_water_mark()
    }

    fn load_for(&self, key: &str) -> StoreLoad {
        (**self).load_for(key)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// Error Reporting Port
// =============================================================================

/// Channel for non-fatal store-side failures.
///
/// Implementations must not block and must not panic: `report` is called
/// from the request hot path.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, event: CacheEvent);
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for Arc<R> {
    fn report(&self, event: CacheEvent) {
        (**self).report(event)
    }
}

// =============================================================================
// Clock Port
// =============================================================================

/// Wall clock used for freshness deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// =============================================================================
// Tests
// =============================================================================
