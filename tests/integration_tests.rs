//! ProxyCache Integration Tests
//!
//! Exercises the public API end to end:
//! - Engine lifecycle and request path
//! - Expiry, eviction and admission
//! - Pipeline decisions
//! - Concurrent access and metrics exposition

use std::sync::Arc;

use assert_matches::assert_matches;
use bytes::Bytes;

use proxycache::cache::{accounted_size, CacheConfig, CacheEngine, ManualClock, RequestKey};
use proxycache::{Error, Lookup, ResponseData};

const T0: u64 = 1_700_000_000;

fn engine_at(config: CacheConfig) -> (Arc<CacheEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let engine = Arc::new(CacheEngine::with_clock(clock.clone()));
    engine.init(config).unwrap();
    (engine, clock)
}

fn single_shard(max_bytes: u64) -> CacheConfig {
    CacheConfig {
        max_bytes,
        shard_count: 1,
        buckets_per_shard: 16,
        ..Default::default()
    }
}

// =============================================================================
// Engine Request Path
// =============================================================================

mod engine_tests {
    use super::*;

    #[test]
    fn test_end_to_end_scenario() {
        let (engine, clock) = engine_at(CacheConfig::new(1_000_000, 60, 10));
        let req = RequestKey::new("GET", "https", "example.com", "/index.html");
        let key = req.key_hash().unwrap();

        assert_matches!(engine.get(&req), Ok(Lookup::Miss));
        assert!(!engine.check_admission(&key));
        clock.advance(1);
        assert!(engine.check_admission(&key));

        engine
            .put(&req, ResponseData::new(200, vec![b'h'; 500]))
            .unwrap();
        let value = engine.get(&req).unwrap().into_value().unwrap();
        assert_eq!(value.status(), 200);
        assert_eq!(value.body_len(), 500);

        let metrics = engine.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.bytes_used, accounted_size(500));
        engine.audit().unwrap();
    }

    #[test]
    fn test_object_bigger_than_shard_budget() {
        // 1_000_000 bytes over 64 shards leaves 15_625 per shard, well
        // under the default object limit
        let (engine, _) = engine_at(CacheConfig::new(1_000_000, 60, 10));
        let shard_budget = engine.config().unwrap().shard_budget();
        assert_eq!(shard_budget, 15_625);

        let fits = RequestKey::new("GET", "https", "h", "/fits");
        engine
            .put(&fits, ResponseData::new(200, vec![1u8; 14_000]))
            .unwrap();
        assert_eq!(
            engine.get(&fits).unwrap().into_value().unwrap().body_len(),
            14_000
        );

        let huge = RequestKey::new("GET", "https", "h", "/huge");
        let max_fit = (shard_budget - accounted_size(0)) as usize;
        assert_matches!(
            engine.put(&huge, ResponseData::new(200, vec![2u8; 20_000])),
            Err(Error::ObjectTooLarge { size: 20_000, max }) if max == max_fit
        );
        assert_matches!(engine.get(&huge), Ok(Lookup::Miss));
        assert_eq!(engine.metrics().evictions, 0);
        engine.audit().unwrap();
    }

    #[test]
    fn test_put_get_invalidate_flow() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let req = RequestKey::new("GET", "https", "example.com", "/index.html")
            .with_query("b=2&a=1");

        assert_matches!(engine.get(&req), Ok(Lookup::Miss));

        engine
            .put(
                &req,
                ResponseData::new(200, "<html>hi</html>")
                    .content_type("text/html")
                    .etag("\"abc\""),
            )
            .unwrap();

        // Query order does not matter
        let reordered = RequestKey::new("GET", "https", "example.com", "/index.html")
            .with_query("a=1&b=2");
        let value = engine.get(&reordered).unwrap().into_value().unwrap();
        assert_eq!(value.body().as_ref(), b"<html>hi</html>");
        assert_eq!(value.content_type(), "text/html");
        assert_eq!(value.etag(), Some("\"abc\""));
        assert_eq!(value.status(), 200);

        engine.invalidate(&req).unwrap();
        assert_matches!(engine.get(&req), Ok(Lookup::Miss));
        assert_matches!(engine.invalidate(&req), Err(Error::NotFound));

        let metrics = engine.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.bytes_used, 0);
        engine.audit().unwrap();
    }

    #[test]
    fn test_vary_and_method_split_entries() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let gzip = RequestKey::new("GET", "https", "h", "/a").with_vary("gzip");
        let plain = RequestKey::new("GET", "https", "h", "/a");
        let implicit = RequestKey::new("", "https", "h", "/a");

        engine.put(&gzip, ResponseData::new(200, "zipped")).unwrap();
        engine.put(&plain, ResponseData::new(200, "plain")).unwrap();

        assert_eq!(
            engine.get(&gzip).unwrap().into_value().unwrap().body().as_ref(),
            b"zipped"
        );
        // Empty method means GET
        assert_eq!(
            engine.get(&implicit).unwrap().into_value().unwrap().body().as_ref(),
            b"plain"
        );
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_rejected_inputs() {
        let config = CacheConfig {
            max_object_bytes: 16,
            ..CacheConfig::new(1 << 20, 60, 10)
        };
        let (engine, _) = engine_at(config);
        let req = RequestKey::new("GET", "https", "h", "/big");

        assert_matches!(
            engine.put(&req, ResponseData::new(200, vec![0u8; 17])),
            Err(Error::ObjectTooLarge { size: 17, max: 16 })
        );
        assert_matches!(
            engine.put(&req, ResponseData::new(200, Bytes::new())),
            Err(Error::InvalidInput(_))
        );
        let long_vary = "v".repeat(200);
        assert_matches!(
            engine.get(&RequestKey::new("GET", "https", "h", "/").with_vary(&long_vary)),
            Err(Error::InvalidInput(_))
        );
        assert_matches!(
            engine.invalidate(&RequestKey::new("GET", "https", "", "/")),
            Err(Error::InvalidInput(_))
        );
        assert!(engine.is_empty());
    }

    #[test]
    fn test_overwrite_accounting() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let req = RequestKey::new("GET", "https", "h", "/o");

        engine.put(&req, ResponseData::new(200, vec![1u8; 100])).unwrap();
        assert_eq!(engine.metrics().bytes_used, accounted_size(100));

        engine.put(&req, ResponseData::new(200, vec![2u8; 40])).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.metrics().bytes_used, accounted_size(40));

        let value = engine.get(&req).unwrap().into_value().unwrap();
        assert_eq!(value.body_len(), 40);
        engine.audit().unwrap();
    }
}

// =============================================================================
// Expiry, Eviction and Admission
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_entry_expires_at_ttl() {
        let (engine, clock) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let req = RequestKey::new("GET", "https", "h", "/ttl");
        engine
            .put(&req, ResponseData::new(200, "short").ttl_secs(5))
            .unwrap();

        clock.advance(4);
        assert!(engine.get(&req).unwrap().is_hit());

        clock.advance(1);
        assert_matches!(engine.get(&req), Ok(Lookup::Miss));
        assert!(engine.is_empty());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.totals.expirations, 1);
        assert_eq!(snapshot.totals.bytes_used, 0);
    }

    #[test]
    fn test_default_ttl_applies_to_zero() {
        let (engine, clock) = engine_at(CacheConfig::new(1 << 20, 30, 10));
        let req = RequestKey::new("GET", "https", "h", "/d");
        engine.put(&req, ResponseData::new(200, "x")).unwrap();

        let value = engine.get(&req).unwrap().into_value().unwrap();
        assert_eq!(value.expires_at(), T0 + 30);

        clock.advance(30);
        assert_matches!(engine.get(&req), Ok(Lookup::Miss));
    }

    #[test]
    fn test_eviction_follows_lru_order() {
        let size = accounted_size(1000);
        let (engine, _) = engine_at(single_shard(5 * size));

        let paths: Vec<String> = (0..6).map(|i| format!("/e{}", i)).collect();
        let keys: Vec<RequestKey<'_>> = paths
            .iter()
            .map(|p| RequestKey::new("GET", "https", "h", p))
            .collect();

        for key in &keys[..5] {
            engine.put(key, ResponseData::new(200, vec![0u8; 1000])).unwrap();
        }
        assert_eq!(engine.len(), 5);
        assert_eq!(engine.metrics().evictions, 0);

        // Touch the oldest so it survives
        assert!(engine.get(&keys[0]).unwrap().is_hit());

        engine.put(&keys[5], ResponseData::new(200, vec![0u8; 1000])).unwrap();

        // Over budget: trimmed to 90%, dropping the two least recently used
        assert_eq!(engine.metrics().evictions, 2);
        assert_eq!(engine.len(), 4);
        assert!(engine.metrics().bytes_used <= 5 * size * 9 / 10);
        assert!(engine.get(&keys[0]).unwrap().is_hit());
        assert_matches!(engine.get(&keys[1]), Ok(Lookup::Miss));
        assert_matches!(engine.get(&keys[2]), Ok(Lookup::Miss));
        assert!(engine.get(&keys[5]).unwrap().is_hit());
        engine.audit().unwrap();
    }

    #[test]
    fn test_maintenance_eviction() {
        let size = accounted_size(1000);
        let (engine, _) = engine_at(single_shard(100 * size));
        let paths: Vec<String> = (0..10).map(|i| format!("/m{}", i)).collect();
        for path in &paths {
            let key = RequestKey::new("GET", "https", "h", path);
            engine.put(&key, ResponseData::new(200, vec![0u8; 1000])).unwrap();
        }

        let evicted = engine.evict_until_under(5 * size).unwrap();
        assert!(evicted > 0);
        assert!(engine.metrics().bytes_used <= 5 * size * 9 / 10);

        // Already under: nothing to do
        assert_eq!(engine.evict_until_under(100 * size).unwrap(), 0);
    }

    #[test]
    fn test_admission_second_hit() {
        let (engine, clock) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let key = RequestKey::new("GET", "https", "h", "/adm").key_hash().unwrap();

        assert!(!engine.check_admission(&key));
        assert_eq!(engine.tracked_admissions(), 1);

        clock.advance(10);
        assert!(engine.check_admission(&key));
        assert_eq!(engine.tracked_admissions(), 0);

        // Consumed: the next sighting starts over
        assert!(!engine.check_admission(&key));

        // Outside the window the sighting is refreshed, not admitted
        clock.advance(11);
        assert!(!engine.check_admission(&key));
        clock.advance(1);
        assert!(engine.check_admission(&key));
    }

    #[test]
    fn test_shutdown_and_reinit() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let req = RequestKey::new("GET", "https", "h", "/life");
        engine.put(&req, ResponseData::new(200, "alive")).unwrap();
        assert!(engine.is_initialized());

        engine.shutdown();
        assert!(!engine.is_initialized());
        assert_matches!(engine.get(&req), Err(Error::NotInitialized));
        assert_matches!(
            engine.put(&req, ResponseData::new(200, "x")),
            Err(Error::NotInitialized)
        );
        assert!(!engine.check_admission(&req.key_hash().unwrap()));
        assert_eq!(engine.metrics().hits, 0);
        assert_eq!(engine.hit_rate(), 0.0);

        // Second shutdown is harmless
        engine.shutdown();

        engine.init(CacheConfig::new(1 << 20, 60, 10)).unwrap();
        assert_matches!(engine.get(&req), Ok(Lookup::Miss));
    }
}

// =============================================================================
// Pipeline
// =============================================================================

mod pipeline_tests {
    use super::*;
    use proxycache::cache::{CachePipeline, Decision, RequestInfo, ResponseInfo, Uncacheable};

    #[test]
    fn test_proxy_request_sequence() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let pipeline = CachePipeline::for_engine(Arc::clone(&engine));
        let request = RequestInfo::new(
            RequestKey::new("GET", "https", "shop.example.com", "/cart").with_query("id=7"),
        )
        .with_headers("Host: shop.example.com\r\nAccept: */*\r\n\r\n");
        let body = Bytes::from_static(b"cart contents");
        let info = ResponseInfo::new(200, body.len() as i64);

        for _ in 0..2 {
            let fetch = assert_matches!(pipeline.lookup(&request), Decision::Fetch(f) => f);
            pipeline.complete(fetch, &info, body.clone());
        }
        for _ in 0..3 {
            assert_matches!(pipeline.lookup(&request), Decision::Serve(_));
        }

        let (cached, missed) = engine.egress_bytes();
        assert_eq!(cached, 3 * body.len() as u64);
        assert_eq!(missed, 2 * body.len() as u64);
        assert!((engine.offload_percent(5) - 60.0).abs() < 1e-9);
        assert!((engine.byte_hit_rate() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_chunked_response_bypasses_store() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let pipeline = CachePipeline::for_engine(Arc::clone(&engine));
        let request = RequestInfo::new(RequestKey::new("GET", "https", "h", "/stream"));

        let _ = pipeline.lookup(&request);
        let fetch = assert_matches!(pipeline.lookup(&request), Decision::Fetch(f) => f);
        assert!(fetch.is_admitted());

        let info = ResponseInfo {
            status: 200,
            chunked: true,
            ..Default::default()
        };
        assert!(!pipeline.complete(fetch, &info, Bytes::from_static(b"data")));
        assert!(engine.is_empty());

        let delete = RequestInfo::new(RequestKey::new("DELETE", "https", "h", "/stream"));
        assert_matches!(pipeline.lookup(&delete), Decision::Bypass(Uncacheable::Method));
    }
}

// =============================================================================
// Concurrency and Exposition
// =============================================================================

mod concurrency_tests {
    use super::*;
    use proxycache::CacheExporter;

    #[test]
    fn test_parallel_workers_keep_invariants() {
        let config = CacheConfig {
            max_bytes: 64 * accounted_size(512) * 8,
            ..CacheConfig::new(0, 60, 10)
        };
        let engine = Arc::new(CacheEngine::start(config).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut lookups = 0u64;
                    for i in 0..2_000u64 {
                        let path = format!("/p{}", (i * 7 + t) % 300);
                        let req = RequestKey::new("GET", "https", "h", &path);
                        if engine.get(&req).unwrap().is_hit() {
                            lookups += 1;
                            continue;
                        }
                        lookups += 1;
                        let len = 1 + (i as usize % 512);
                        engine.put(&req, ResponseData::new(200, vec![t as u8; len])).unwrap();
                        if i % 97 == 0 {
                            let _ = engine.invalidate(&req);
                        }
                    }
                    lookups
                })
            })
            .collect();

        let lookups: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        engine.audit().unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.totals.hits + snapshot.totals.misses, lookups);
        let per_shard = snapshot.max_bytes / snapshot.shard_count as u64;
        for stats in engine.shard_stats() {
            assert!(stats.bytes_used <= per_shard);
        }
    }

    #[test]
    fn test_exporter_reflects_engine() {
        let (engine, _) = engine_at(CacheConfig::new(1 << 20, 60, 10));
        let req = RequestKey::new("GET", "https", "h", "/x");
        engine.put(&req, ResponseData::new(200, "metrics")).unwrap();
        engine.get(&req).unwrap();
        engine.get(&RequestKey::new("GET", "https", "h", "/y")).unwrap();

        let exporter = CacheExporter::new().unwrap();
        exporter.refresh(&engine.snapshot());
        let text = String::from_utf8(exporter.encode().unwrap()).unwrap();
        assert!(text.contains("proxycache_hits 1"));
        assert!(text.contains("proxycache_misses 1"));
        assert!(text.contains("proxycache_hit_rate_percent 50"));
    }
}
