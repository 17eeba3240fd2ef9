//! Pass-through-on-miss strategy.
//!
//! A decodable store entry answers the request with no further I/O. On a
//! miss the upstream answers and the result is written behind the answer.

use std::sync::Arc;

use tracing::debug;

use super::{EngineInner, Lookup};
use crate::domain::ports::FetchResult;
use crate::expiry::Resolution;

pub(crate) async fn run(
    inner: &Arc<EngineInner>,
    resource_id: &str,
    resolution: Resolution,
) -> FetchResult {
    let Resolution { key, ttl, .. } = resolution;

    if !inner.admit(&key) {
        return inner.fetch(resource_id).await;
    }

    match inner.lookup(&key).await {
        Lookup::Hit(result, _) => {
            debug!(key = %key, "Cache hit");
            inner.metrics.record_hit();
            return result;
        }
        // Store unavailable: answer from upstream, skip the write
        Lookup::Failed => return inner.fetch(resource_id).await,
        Lookup::Miss => inner.metrics.record_miss(),
    }

    let result = inner.fetch(resource_id).await;
    if let Some(value) = inner.encode(&key, &result) {
        let writer = inner.clone();
        inner.spawn(async move { writer.write(&key, value, ttl).await });
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use crate::adapters::{CollectingReporter, InMemoryStore};
    use crate::config::{CacheMode, EngineConfig, ExpirySetting};
    use crate::domain::events::CacheEventKind;
    use crate::domain::ports::{Payload, StoreClient};
    use crate::engine::testing::CountingSource;
    use crate::engine::CachingEngine;

    fn engine(
        source: CountingSource,
        store: Arc<InMemoryStore>,
        reporter: Arc<CollectingReporter>,
    ) -> CachingEngine {
        CachingEngine::builder(source, store)
            .config(
                EngineConfig::default()
                    .with_mode(CacheMode::Passthrough)
                    .with_namespace("test")
                    .with_ttl(ExpirySetting::seconds(60)),
            )
            .reporter(reporter)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = Arc::new(InMemoryStore::new());
        let source = CountingSource::echo();
        let calls = source.calls();
        let engine = engine(source, store.clone(), Arc::new(CollectingReporter::new()));

        let first = engine.get("a").await.unwrap();
        assert_eq!(first.payload, Payload::Text("a:1".into()));
        assert!(!first.is_cache_hit());
        engine.drain().await;
        assert_eq!(store.ttl_of("test-a"), Some(60));

        let second = engine.get("a").await.unwrap();
        assert_eq!(second.payload, Payload::Bytes(Bytes::from_static(b"a:1")));
        assert!(second.is_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let m = engine.metrics();
        assert_eq!((m.hits, m.misses, m.requests), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_store_read_error_falls_back_without_write() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_reads(true);
        let reporter = Arc::new(CollectingReporter::new());
        let engine = engine(CountingSource::echo(), store.clone(), reporter.clone());

        assert!(engine.get("a").await.is_ok());
        engine.drain().await;

        assert_eq!(reporter.events_of_kind(CacheEventKind::StoreRead).len(), 1);
        assert_eq!(store.stats().writes, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_replaced() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw("test-a", Bytes::from_static(b"not an envelope"), 60);
        let reporter = Arc::new(CollectingReporter::new());
        let engine = engine(CountingSource::echo(), store.clone(), reporter.clone());

        let result = engine.get("a").await.unwrap();
        assert!(!result.is_cache_hit());
        engine.drain().await;

        assert_eq!(reporter.events_of_kind(CacheEventKind::Decode).len(), 1);
        assert!(store.get("test-a").await.unwrap().unwrap().len() > 1024);
    }

    #[tokio::test]
    async fn test_cacheable_error_is_replayed() {
        let store = Arc::new(InMemoryStore::new());
        let source = CountingSource::failing(Some(404));
        let calls = source.calls();
        let engine = engine(source, store.clone(), Arc::new(CollectingReporter::new()));

        let first = engine.get("gone").await.unwrap_err();
        assert!(!first.is_cached());
        engine.drain().await;
        assert_eq!(store.raw("test-gone"), Some(Bytes::from_static(b"404")));

        let second = engine.get("gone").await.unwrap_err();
        assert!(second.is_cached());
        assert_eq!(second.status_in("status"), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_cacheable_error_passes_through() {
        let store = Arc::new(InMemoryStore::new());
        let source = CountingSource::failing(Some(500));
        let calls = source.calls();
        let engine = engine(source, store.clone(), Arc::new(CollectingReporter::new()));

        for expected in 1..=3 {
            let err = engine.get("boom").await.unwrap_err();
            assert_eq!(err.message(), "upstream failed");
            assert_matches!(err.status_in("status"), Some(500));
            engine.drain().await;
            assert_eq!(calls.load(Ordering::SeqCst), expected);
        }
        assert!(store.is_empty());
    }
}
