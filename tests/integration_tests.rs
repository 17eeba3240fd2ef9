//! Cachefront Integration Tests
//!
//! Exercises the engine end to end over in-memory stores:
//! - Envelope format guarantees
//! - Expiry rule resolution
//! - Strategy behavior (race, relay, pass-through)
//! - Backpressure and error handling
//! - Cluster routing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cachefront::{
    source_fn, CacheEventKind, CacheMode, CachingEngine, CollectingReporter, EngineConfig,
    ExpirySetting, InMemoryStore, ManualClock, Payload, Response, Source, SourceError,
};

/// Upstream answering `"<id>:<call number>"` after `delay`.
fn counting_source(calls: Arc<AtomicUsize>, delay: Duration) -> impl Source + 'static {
    source_fn(move |id: String| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(Response::new(format!("{}:{}", id, n)))
        }
    })
}

/// Upstream that always fails with the given error.
fn failing_source(calls: Arc<AtomicUsize>, err: SourceError) -> impl Source + 'static {
    source_fn(move |_id: String| {
        let calls = calls.clone();
        let err = err.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(err)
        }
    })
}

// =============================================================================
// Envelope
// =============================================================================

mod envelope_tests {
    use super::*;
    use cachefront::envelope::{HEADER_HIT, HEADER_SLOT_SIZE};
    use cachefront::{EnvelopeCodec, Error, Headers};
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_payload_and_headers() {
        let codec = EnvelopeCodec::default();
        let response = Response::new(Bytes::from_static(b"\x89PNG\r\n"))
            .with_header("content-type", "image/png")
            .with_header("content-length", 6);

        let encoded = codec.encode(&Ok(response.clone())).unwrap().unwrap();
        assert_eq!(encoded.len(), HEADER_SLOT_SIZE + 6);

        let decoded = codec.decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.payload, response.payload);
        assert_eq!(decoded.headers.get("content-type"), Some(&json!("image/png")));
        assert_eq!(decoded.headers.get(HEADER_HIT), Some(&json!("hit")));
    }

    #[test]
    fn test_structured_payload_round_trip() {
        let codec = EnvelopeCodec::default();
        let value = json!({"tiles": [1, 2, 3], "name": "streets"});
        let encoded = codec.encode(&Ok(Response::new(value.clone()))).unwrap().unwrap();
        let decoded = codec.decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.payload, Payload::Json(value));
    }

    #[test]
    fn test_header_size_bound() {
        let codec = EnvelopeCodec::default();

        // {"x":"<v>"} is 8 bytes of framing
        let exact = "a".repeat(HEADER_SLOT_SIZE - 8);
        let fits = Response::new("body").with_header("x", exact);
        let encoded = codec.encode(&Ok(fits)).unwrap().unwrap();
        assert_eq!(encoded.len(), HEADER_SLOT_SIZE + 4);

        let over = "a".repeat(HEADER_SLOT_SIZE - 7);
        let too_big = Response::new("body").with_header("x", over);
        assert!(matches!(
            codec.encode(&Ok(too_big)),
            Err(Error::EnvelopeTooLarge { size: 1025, limit: 1024 })
        ));
    }

    #[test]
    fn test_compact_form() {
        let codec = EnvelopeCodec::default();

        for code in [403u16, 404] {
            let err = SourceError::new("nope").with_status("status", code);
            let encoded = codec.encode(&Err(err)).unwrap().unwrap();
            assert_eq!(encoded, Bytes::from(code.to_string()));

            let replayed = codec.decode(&encoded).unwrap().unwrap_err();
            assert!(replayed.is_cached());
            assert_eq!(replayed.status_in("status"), Some(code));
            assert!(replayed.headers().is_empty());
        }
    }

    #[test]
    fn test_non_cacheable_error_encodes_to_nothing() {
        let codec = EnvelopeCodec::default();
        let err = SourceError::new("boom").with_status("status", 500);
        assert_eq!(codec.encode(&Err(err)).unwrap(), None);
        assert_eq!(codec.encode(&Err(SourceError::new("boom"))).unwrap(), None);
    }

    #[test]
    fn test_content_length_mismatch() {
        let codec = EnvelopeCodec::default();
        let mut headers = Headers::new();
        headers.insert("content-length".into(), json!(99));
        let encoded = codec
            .encode(&Ok(Response::new("short").with_headers(headers)))
            .unwrap()
            .unwrap();

        assert!(matches!(
            codec.decode(&encoded),
            Err(Error::ContentLengthMismatch { expected: 99, actual: 5 })
        ));
    }
}

// =============================================================================
// Expiry Resolution
// =============================================================================

mod expiry_tests {
    use cachefront::expiry::{ExpiryRule, ExpiryRules, DEFAULT_EXPIRY_SECONDS};
    use cachefront::{Discriminator, KeyResolver};

    fn rules(pairs: &[(&str, u64)]) -> ExpiryRules {
        ExpiryRules::new(
            pairs
                .iter()
                .map(|(p, v)| ExpiryRule::new(p, *v).unwrap())
                .collect(),
            None,
        )
    }

    #[test]
    fn test_pattern_precedence() {
        let forward = rules(&[("streets", 1), ("satellite", 1)]);
        let reverse = rules(&[("satellite", 1), ("streets", 1)]);

        assert_eq!(forward.resolve("streets"), 1);
        assert_eq!(reverse.resolve("streets"), 1);
        assert_eq!(forward.resolve("terrain"), DEFAULT_EXPIRY_SECONDS);
    }

    #[test]
    fn test_hostname_rules_from_urls() {
        let resolver = KeyResolver::new(
            "tiles",
            rules(&[("streets", 60), ("satellite", 3600)]),
            ExpiryRules::fixed(10),
            Discriminator::Hostname,
        );

        let r = resolver.resolve("http://satellite.tiles.local/1/2/3.png");
        assert_eq!(r.key, "tiles-http://satellite.tiles.local/1/2/3.png");
        assert_eq!(r.ttl, 3600);
        assert_eq!(r.stale, 10);
    }
}

// =============================================================================
// Strategies
// =============================================================================

mod strategy_tests {
    use super::*;

    fn config(mode: CacheMode) -> EngineConfig {
        EngineConfig::default()
            .with_mode(mode)
            .with_namespace("test")
    }

    #[tokio::test]
    async fn test_race_first_wins() {
        let store = Arc::new(InMemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CachingEngine::builder(
            counting_source(calls.clone(), Duration::from_millis(50)),
            store.clone(),
        )
        .config(config(CacheMode::Race))
        .reporter(Arc::new(CollectingReporter::new()))
        .build()
        .unwrap();

        // Prime the store
        let first = engine.get("a").await.unwrap();
        assert!(!first.is_cache_hit());
        engine.drain().await;
        assert_eq!(store.stats().writes, 1);

        // Store answers while the upstream is still sleeping
        let started = std::time::Instant::now();
        let second = engine.get("a").await.unwrap();
        assert!(second.is_cache_hit());
        assert_eq!(second.payload, Payload::Bytes(Bytes::from_static(b"a:1")));
        assert!(started.elapsed() < Duration::from_millis(50));

        // The upstream still completes and only triggers the finalize check
        engine.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.stats().writes, 2);

        let m = engine.metrics();
        assert_eq!(m.requests, 2);
        assert_eq!(m.hits + m.misses, 2);
    }

    #[tokio::test]
    async fn test_relay_stale_while_revalidate() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStore::new().with_clock(clock.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CachingEngine::builder(counting_source(calls.clone(), Duration::ZERO), store.clone())
            .config(
                config(CacheMode::Relay)
                    .with_ttl(ExpirySetting::seconds(1))
                    .with_stale(ExpirySetting::seconds(1)),
            )
            .clock(clock.clone())
            .build()
            .unwrap();

        // t=0: miss
        let r = engine.get("a").await.unwrap();
        assert_eq!(r.payload, Payload::Text("a:1".into()));
        engine.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.ttl_of("test-a"), Some(2));

        // t=0.5: fresh hit
        clock.advance(Duration::from_millis(500));
        let r = engine.get("a").await.unwrap();
        assert!(r.is_cache_hit());
        engine.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t=1.5: stale hit answered at once, refreshed behind the answer
        clock.advance(Duration::from_secs(1));
        let r = engine.get("a").await.unwrap();
        assert_eq!(r.payload, Payload::Bytes(Bytes::from_static(b"a:1")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        engine.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The refresh is visible to the next request
        let r = engine.get("a").await.unwrap();
        assert_eq!(r.payload, Payload::Bytes(Bytes::from_static(b"a:2")));
        engine.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backpressure_bypass() {
        for mode in [CacheMode::Passthrough, CacheMode::Race, CacheMode::Relay] {
            let store = Arc::new(InMemoryStore::new());
            let reporter = Arc::new(CollectingReporter::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let engine =
                CachingEngine::builder(counting_source(calls.clone(), Duration::ZERO), store.clone())
                    .config(config(mode).with_high_water_mark(0))
                    .reporter(reporter.clone())
                    .build()
                    .unwrap();

            for _ in 0..3 {
                assert!(engine.get("a").await.is_ok());
            }
            engine.drain().await;

            let stats = store.stats();
            assert_eq!((stats.reads, stats.writes), (0, 0), "mode {}", mode);
            assert_eq!(reporter.len(), 3, "mode {}", mode);
            assert_eq!(
                reporter.events_of_kind(CacheEventKind::HighWaterMark).len(),
                3,
                "mode {}",
                mode
            );
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(engine.metrics().bypassed, 3);
        }
    }

    #[tokio::test]
    async fn test_non_cacheable_error_never_persisted() {
        for mode in [CacheMode::Passthrough, CacheMode::Race, CacheMode::Relay] {
            let store = Arc::new(InMemoryStore::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let upstream_err = SourceError::new("internal").with_attribute("reason", "db down");
            let engine = CachingEngine::builder(
                failing_source(calls.clone(), upstream_err.clone()),
                store.clone(),
            )
            .config(config(mode))
            .reporter(Arc::new(CollectingReporter::new()))
            .build()
            .unwrap();

            let mut last = 0;
            for _ in 0..4 {
                let err = engine.get("broken").await.unwrap_err();
                assert_eq!(err, upstream_err);
                engine.drain().await;

                let now = calls.load(Ordering::SeqCst);
                assert!(now > last, "mode {}", mode);
                last = now;
            }
            assert!(store.is_empty(), "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn test_custom_status_field() {
        let store = Arc::new(InMemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CachingEngine::builder(
            failing_source(calls.clone(), SourceError::new("gone").with_status("httpStatus", 404)),
            store.clone(),
        )
        .config(config(CacheMode::Passthrough).with_status_fields(["httpStatus"]))
        .build()
        .unwrap();

        engine.get("a").await.unwrap_err();
        engine.drain().await;
        let replayed = engine.get("a").await.unwrap_err();

        assert!(replayed.is_cached());
        assert_eq!(replayed.status_in("httpStatus"), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_invisible_to_callers() {
        for mode in [CacheMode::Passthrough, CacheMode::Race, CacheMode::Relay] {
            let store = Arc::new(InMemoryStore::new());
            store.fail_reads(true);
            store.fail_writes(true);
            let reporter = Arc::new(CollectingReporter::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let engine =
                CachingEngine::builder(counting_source(calls.clone(), Duration::ZERO), store.clone())
                    .config(config(mode))
                    .reporter(reporter.clone())
                    .build()
                    .unwrap();

            let r = engine.get("a").await.unwrap();
            assert_eq!(r.payload, Payload::Text("a:1".into()), "mode {}", mode);
            engine.drain().await;
            assert!(!reporter.is_empty(), "mode {}", mode);
        }
    }
}

// =============================================================================
// Cluster
// =============================================================================

mod cluster_tests {
    use super::*;
    use cachefront::{ClusterRouter, StoreClient};

    #[tokio::test]
    async fn test_engine_over_cluster() {
        let stores: Vec<Arc<InMemoryStore>> = (0..3).map(|_| Arc::new(InMemoryStore::new())).collect();
        let nodes = stores
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("redis://10.0.0.{}:6379", i), s.clone() as Arc<dyn StoreClient>))
            .collect();
        let router = Arc::new(ClusterRouter::new(nodes, 160).unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CachingEngine::builder(counting_source(calls.clone(), Duration::ZERO), router.clone())
            .config(EngineConfig::default().with_mode(CacheMode::Passthrough))
            .build()
            .unwrap();

        for i in 0..20 {
            engine.get(&format!("tile/{}", i)).await.unwrap();
        }
        engine.drain().await;

        let total: usize = stores.iter().map(|s| s.len()).sum();
        assert_eq!(total, 20);
        assert!(stores.iter().filter(|s| !s.is_empty()).count() > 1);

        for i in 0..20 {
            assert!(engine.get(&format!("tile/{}", i)).await.unwrap().is_cache_hit());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 20);

        engine.flush().await.unwrap();
        assert!(stores.iter().all(|s| s.is_empty()));
    }
}
