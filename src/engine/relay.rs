//! Relay (stale-while-revalidate) strategy.
//!
//! Entries carry their own freshness deadline in `x-cache-expires` and are
//! kept in the store for a stale window past it. A stale hit is answered at
//! once and refreshed in the background.
//!
//! ```text
//!   ──────────┬───────────────┬──────────────► t
//!          written      x-cache-expires    store expiry
//!             │    fresh      │    stale      │
//!             │  answer only  │ answer, then  │  miss
//!             │               │ refresh       │
//! ```

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::{EngineInner, Lookup};
use crate::domain::ports::{header, FetchResult, Headers};
use crate::envelope::HEADER_EXPIRES;
use crate::expiry::Resolution;

/// RFC 7231 IMF-fixdate.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub(crate) fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE).to_string()
}

pub(crate) fn parse_http_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn headers_of(result: &FetchResult) -> &Headers {
    match result {
        Ok(response) => &response.headers,
        Err(err) => err.headers(),
    }
}

/// Whole seconds until `deadline`, rounded up. Zero or less once reached.
fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        millis.div_euclid(1000)
    } else {
        (millis + 999) / 1000
    }
}

/// True while the entry's freshness deadline lies ahead. Entries without a
/// readable deadline count as stale.
fn is_fresh(result: &FetchResult, now: DateTime<Utc>) -> bool {
    headers_of(result)
        .get(HEADER_EXPIRES)
        .and_then(parse_http_date)
        .map(|deadline| deadline > now)
        .unwrap_or(false)
}

/// Freshness deadline and store lifetime for a fresh upstream result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Freshness {
    pub deadline: DateTime<Utc>,
    pub lifetime: u64,
}

/// Nearest whole second, halves rounding up. HTTP dates carry whole seconds.
fn round_to_second(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let seconds = if at.timestamp_subsec_nanos() >= 500_000_000 {
        at.timestamp().checked_add(1)?
    } else {
        at.timestamp()
    };
    DateTime::from_timestamp(seconds, 0)
}

/// `now + ttl` on the whole-second grid. Entries written at any sub-second
/// offset stay fresh within half a second of `ttl`.
fn ttl_deadline(now: DateTime<Utc>, ttl: u64) -> Option<DateTime<Utc>> {
    if ttl == 0 {
        return None;
    }
    let ttl = chrono::Duration::try_seconds(i64::try_from(ttl).ok()?)?;
    round_to_second(now.checked_add_signed(ttl)?)
}

/// An upstream `Expires` header is honored exactly with no stale padding.
/// Otherwise the entry is fresh for `ttl` and kept `stale` seconds longer.
/// `None` when the deadline has already passed or is out of range.
pub(crate) fn freshness(
    result: &FetchResult,
    now: DateTime<Utc>,
    ttl: u64,
    stale: u64,
) -> Option<Freshness> {
    let upstream = header(headers_of(result), "expires").and_then(parse_http_date);

    let (deadline, padding) = match upstream {
        Some(deadline) => (deadline, 0),
        None => (ttl_deadline(now, ttl)?, stale),
    };

    let remaining = remaining_seconds(deadline, now);
    if remaining <= 0 {
        return None;
    }
    Some(Freshness {
        deadline,
        lifetime: (remaining as u64).saturating_add(padding),
    })
}

/// Stamp `result` with its freshness deadline and encode it for the store.
/// Returns the value and its store lifetime, or `None` when the result is
/// not cacheable or already expired.
fn prepare(
    inner: &EngineInner,
    key: &str,
    result: &mut FetchResult,
    ttl: u64,
    stale: u64,
) -> Option<(Bytes, u64)> {
    if !inner.codec.statuses().is_cacheable(result) {
        return None;
    }
    let Some(fresh) = freshness(result, inner.clock.now(), ttl, stale) else {
        debug!(key = %key, "No freshness window, not caching");
        return None;
    };

    let stamp = Value::from(format_http_date(fresh.deadline));
    match result {
        Ok(response) => {
            response.headers.insert(HEADER_EXPIRES.to_string(), stamp);
        }
        Err(err) => {
            err.headers_mut().insert(HEADER_EXPIRES.to_string(), stamp);
        }
    }

    inner.encode(key, result).map(|value| (value, fresh.lifetime))
}

pub(crate) async fn run(
    inner: &Arc<EngineInner>,
    resource_id: &str,
    resolution: Resolution,
) -> FetchResult {
    let Resolution { key, ttl, stale } = resolution;

    if !inner.admit(&key) {
        return inner.fetch(resource_id).await;
    }

    match inner.lookup(&key).await {
        Lookup::Failed => return inner.fetch(resource_id).await,
        Lookup::Hit(result, _) if is_fresh(&result, inner.clock.now()) => {
            debug!(key = %key, "Fresh hit");
            inner.metrics.record_hit();
            return result;
        }
        Lookup::Hit(result, _) => {
            debug!(key = %key, "Stale hit, refreshing in background");
            inner.metrics.record_stale_hit();

            let engine = inner.clone();
            let resource_id = resource_id.to_string();
            inner.spawn(async move {
                engine.metrics.record_background_refresh();
                let mut fresh = engine.fetch(&resource_id).await;
                if let Some((value, lifetime)) = prepare(&engine, &key, &mut fresh, ttl, stale) {
                    engine.write(&key, value, lifetime).await;
                }
            });
            return result;
        }
        Lookup::Miss => inner.metrics.record_miss(),
    }

    let mut result = inner.fetch(resource_id).await;
    if let Some((value, lifetime)) = prepare(inner, &key, &mut result, ttl, stale) {
        let engine = inner.clone();
        inner.spawn(async move { engine.write(&key, value, lifetime).await });
    }
    result
}
