//! Engine Metrics
//!
//! Counters for monitoring cache effectiveness and store health.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    requests: AtomicU64,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    upstream_fetches: AtomicU64,
    store_writes: AtomicU64,
    store_errors: AtomicU64,
    bypassed: AtomicU64,
    background_refreshes: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale relay entry served while a refresh runs. Also counts as a hit.
    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
        self.record_hit();
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_write(&self) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Request answered without touching the store (backpressure).
    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits(),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            store_writes: self.store_writes.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub upstream_fetches: u64,
    pub store_writes: u64,
    pub store_errors: u64,
    pub bypassed: u64,
    pub background_refreshes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.hit_ratio(), 0.0);

        metrics.record_hit();
        metrics.record_stale_hit();
        metrics.record_miss();
        metrics.record_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.stale_hits, 1);
        assert_eq!(snapshot.misses, 2);
        assert!((snapshot.hit_ratio - 0.5).abs() < f64::EPSILON);
    }
}
