//! Error types for the caching engine
//!
//! These are store-side and construction-time failures. Upstream failures
//! are not represented here: they travel as [`SourceError`] values and reach
//! the caller untouched.
//!
//! [`SourceError`]: crate::domain::ports::SourceError

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Envelope Errors
    // =========================================================================
    /// Serialized header block does not fit in the fixed header slot
    #[error("Envelope header block is {size} bytes, limit is {limit}")]
    EnvelopeTooLarge { size: usize, limit: usize },

    /// Stored value could not be parsed as an envelope
    #[error("Invalid cache value: {0}")]
    InvalidCacheValue(String),

    /// Stored payload length disagrees with its content-length header
    #[error("Content length does not match: header says {expected}, payload is {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Store client has too many pending operations
    #[error("Store command queue at high water mark ({pending} pending, limit {limit})")]
    HighWaterMark { pending: usize, limit: usize },

    /// Generic store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Expiry rule pattern failed to compile
    #[error("Invalid expiry pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Misc
    // =========================================================================
    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream client construction error
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl Error {
    /// True for errors that mean the stored bytes themselves are unusable.
    pub fn is_corrupt_value(&self) -> bool {
        matches!(
            self,
            Error::InvalidCacheValue(_) | Error::ContentLengthMismatch { .. }
        )
    }
}
