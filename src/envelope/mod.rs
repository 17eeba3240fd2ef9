//! Envelope Codec
//!
//! Wire format of a cached response:
//!
//! ```text
//! ┌──────────────────────────────────────┬──────────────────────────┐
//! │ header JSON, space padded to 1024 B  │ payload bytes (optional) │
//! └──────────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! A cached 403/404 without any bookkeeping headers is stored in the
//! compact form: exactly the three ASCII digits of the status.

mod status;

pub use status::{CacheableStatus, StatusExtractor, DEFAULT_STATUS_FIELDS};

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::domain::ports::{header, FetchResult, Headers, Payload, Response, SourceError};
use crate::error::{Error, Result};

/// Size of the fixed header slot.
pub const HEADER_SLOT_SIZE: usize = 1024;

/// Status code of a cached upstream error.
pub const HEADER_ERR: &str = "x-cache-err";
/// Set when the payload was a structured value stored as JSON.
pub const HEADER_JSON: &str = "x-cache-json";
/// Added to every decoded header block.
pub const HEADER_HIT: &str = "x-cache";
/// Freshness deadline (HTTP date) written by the relay strategy.
pub const HEADER_EXPIRES: &str = "x-cache-expires";

/// Encodes fetch outcomes into store values and back.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    statuses: StatusExtractor,
}

impl EnvelopeCodec {
    pub fn new(statuses: StatusExtractor) -> Self {
        Self { statuses }
    }

    pub fn statuses(&self) -> &StatusExtractor {
        &self.statuses
    }

    /// Encode a fetch outcome.
    ///
    /// Returns `Ok(None)` when the outcome must not be cached (an upstream
    /// error without a cacheable status).
    pub fn encode(&self, result: &FetchResult) -> Result<Option<Bytes>> {
        match result {
            Ok(response) => encode_response(response).map(Some),
            Err(err) => match self.statuses.cacheable(err) {
                Some(status) => encode_error(status, err.headers()).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Decode a store value.
    ///
    /// A cached error decodes to `Ok(Err(..))`: the decode succeeded and
    /// the replayed outcome is an error.
    pub fn decode(&self, value: &Bytes) -> Result<FetchResult> {
        if value.len() == 3 {
            if let Some(status) = CacheableStatus::from_marker(value) {
                return Ok(Err(self.replay(status, Headers::new())));
            }
        }

        let split = value.len().min(HEADER_SLOT_SIZE);
        let head = std::str::from_utf8(&value[..split])
            .map_err(|e| Error::InvalidCacheValue(format!("header block is not UTF-8: {}", e)))?;

        let mut headers = match serde_json::from_str::<Value>(head.trim()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(Error::InvalidCacheValue(
                    "header block is not a JSON object".to_string(),
                ))
            }
            Err(e) => return Err(Error::InvalidCacheValue(e.to_string())),
        };
        headers.insert(HEADER_HIT.to_string(), Value::from("hit"));

        if let Some(marker) = headers.get(HEADER_ERR) {
            let status = status_value(marker)
                .and_then(CacheableStatus::from_code)
                .ok_or_else(|| {
                    Error::InvalidCacheValue(format!("unexpected error marker {}", marker))
                })?;
            return Ok(Err(self.replay(status, headers)));
        }

        let body = value.slice(split..);

        if let Some(expected) = header(&headers, "content-length").and_then(length_value) {
            if expected != body.len() as u64 {
                return Err(Error::ContentLengthMismatch {
                    expected,
                    actual: body.len() as u64,
                });
            }
        }

        let payload = if headers.get(HEADER_JSON) == Some(&Value::Bool(true)) {
            let parsed = serde_json::from_slice(&body)
                .map_err(|e| Error::InvalidCacheValue(format!("JSON payload: {}", e)))?;
            Payload::Json(parsed)
        } else {
            Payload::Bytes(body)
        };

        Ok(Ok(Response { payload, headers }))
    }

    fn replay(&self, status: CacheableStatus, headers: Headers) -> SourceError {
        SourceError::replayed(status.code(), self.statuses.fields(), headers)
    }
}

fn encode_response(response: &Response) -> Result<Bytes> {
    let mut headers = response.headers.clone();
    headers.remove(HEADER_HIT);

    let body = match &response.payload {
        Payload::Bytes(b) => {
            headers.remove(HEADER_JSON);
            b.clone()
        }
        Payload::Text(s) => {
            headers.remove(HEADER_JSON);
            Bytes::copy_from_slice(s.as_bytes())
        }
        Payload::Json(v) => {
            headers.insert(HEADER_JSON.to_string(), Value::Bool(true));
            let body = Bytes::from(serde_json::to_vec(v)?);
            // re-serialized JSON rarely keeps the upstream byte count
            for (name, value) in headers.iter_mut() {
                if name.eq_ignore_ascii_case("content-length") {
                    *value = Value::from(body.len() as u64);
                }
            }
            body
        }
    };

    write_slot(&serde_json::to_vec(&headers)?, &body)
}

fn encode_error(status: CacheableStatus, headers: &Headers) -> Result<Bytes> {
    let bookkeeping: Headers = headers
        .iter()
        .filter(|(k, _)| k.starts_with("x-cache-") && k.as_str() != HEADER_JSON)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if bookkeeping.is_empty() {
        return Ok(Bytes::from_static(status.marker()));
    }

    let mut block = bookkeeping;
    block.insert(HEADER_ERR.to_string(), Value::from(status.code().to_string()));
    write_slot(&serde_json::to_vec(&block)?, &[])
}

fn write_slot(header_json: &[u8], body: &[u8]) -> Result<Bytes> {
    if header_json.len() > HEADER_SLOT_SIZE {
        return Err(Error::EnvelopeTooLarge {
            size: header_json.len(),
            limit: HEADER_SLOT_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SLOT_SIZE + body.len());
    buf.put_slice(header_json);
    buf.put_bytes(b' ', HEADER_SLOT_SIZE - header_json.len());
    buf.put_slice(body);
    Ok(buf.freeze())
}

fn status_value(v: &Value) -> Option<u16> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
        _ => None,
    }
}

fn length_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
