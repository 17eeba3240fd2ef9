//! Cache Events
//!
//! Records of store-side failures the engine absorbed. None of these ever
//! reach the caller of a fetch; they are handed to the configured
//! [`ErrorReporter`](super::ports::ErrorReporter) instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    /// Store skipped because of backpressure
    HighWaterMark,
    /// `get` against the store failed
    StoreRead,
    /// `set_with_expiry` against the store failed
    StoreWrite,
    /// Stored bytes could not be decoded
    Decode,
    /// Upstream result could not be encoded
    Encode,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventKind::HighWaterMark => "high_water_mark",
            CacheEventKind::StoreRead => "store_read",
            CacheEventKind::StoreWrite => "store_write",
            CacheEventKind::Decode => "decode",
            CacheEventKind::Encode => "encode",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single absorbed failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    /// Cache key involved, when the failure is tied to one
    pub key: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, key: Option<&str>, error: &Error) -> Self {
        Self {
            kind,
            key: key.map(str::to_string),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the timestamp, e.g. with the engine clock's time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn high_water_mark(key: &str, error: &Error) -> Self {
        Self::new(CacheEventKind::HighWaterMark, Some(key), error)
    }

    pub fn store_read(key: &str, error: &Error) -> Self {
        Self::new(CacheEventKind::StoreRead, Some(key), error)
    }

    pub fn store_write(key: &str, error: &Error) -> Self {
        Self::new(CacheEventKind::StoreWrite, Some(key), error)
    }

    pub fn decode(key: &str, error: &Error) -> Self {
        Self::new(CacheEventKind::Decode, Some(key), error)
    }

    pub fn encode(key: &str, error: &Error) -> Self {
        Self::new(CacheEventKind::Encode, Some(key), error)
    }

    /// Event type name, as used in logs.
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_carries_key_and_message() {
        let err = Error::Store("connection refused".into());
        let event = CacheEvent::store_read("ns-a", &err);

        assert_eq!(event.kind, CacheEventKind::StoreRead);
        assert_eq!(event.key.as_deref(), Some("ns-a"));
        assert_eq!(event.message, "Store error: connection refused");
        assert_eq!(event.event_type(), "store_read");
    }

    #[test]
    fn test_event_serialization() {
        let err = Error::HighWaterMark {
            pending: 1,
            limit: 0,
        };
        let event = CacheEvent::high_water_mark("ns-b", &err);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "high_water_mark");
        assert_eq!(json["key"], "ns-b");
    }

    #[test]
    fn test_event_timestamp_override() {
        let t = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = CacheEvent::decode("ns-c", &Error::InvalidCacheValue("short".into())).at(t);
        assert_eq!(event.timestamp, t);
    }
}
