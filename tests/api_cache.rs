//! API cache behaviour across tiers, TTL expiry, coalescing and rate limiting.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::resilience::rate_limiter::RateLimiterConfig;
use tiercache::{ApiCache, ApiCacheConfig, CacheKey, RequestHeaders};

fn api_cache(root: &std::path::Path, ttl: Duration) -> ApiCache {
    ApiCache::new(ApiCacheConfig::new(root).with_ttl(ttl))
}

fn headers(pairs: &[(&str, &str)]) -> RequestHeaders {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));
    let h = RequestHeaders::new();

    let callers = (0..16).map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        let h = h.clone();
        async move {
            cache
                .get_or_fetch::<Value, _, _, _>("https://api.example.test/repos/a/b", &h, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, std::io::Error>(json!({"stars": 42}))
                })
                .await
        }
    });
    let results = futures::future::join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!({"stars": 42}));
    }
    let stats = cache.stats().await;
    assert_eq!(stats.fetches, 1);
    assert!(stats.coalesced >= 1);
    assert_eq!(stats.pending_fetches, 0);

    // The value is now cached, so a later call does not fetch at all.
    let again: Value = cache
        .get_or_fetch("https://api.example.test/repos/a/b", &h, || async {
            Err::<Value, _>(std::io::Error::other("must not be called"))
        })
        .await
        .unwrap();
    assert_eq!(again["stars"], 42);
}

#[tokio::test]
async fn test_failed_fetch_reaches_every_waiter() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let h = RequestHeaders::new();

    let callers = (0..4).map(|_| {
        let cache = cache.clone();
        let h = h.clone();
        async move {
            cache
                .get_or_fetch::<Value, _, _, _>("u", &h, || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<Value, _>(std::io::Error::other("rate limited upstream"))
                })
                .await
        }
    });
    for result in futures::future::join_all(callers).await {
        let err = result.unwrap_err();
        assert!(err.is_fetch());
        assert!(err.to_string().contains("rate limited upstream"));
    }
    assert!(cache.get::<Value>("u", &h).await.is_none());
    assert_eq!(cache.stats().await.fetch_failures, 1);
}

#[tokio::test]
async fn test_ttl_expiry() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_millis(100));
    let h = RequestHeaders::new();

    cache.set("u1", &json!({"v": 1}), &h).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get::<Value>("u1", &h).await, Some(json!({"v": 1})));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get::<Value>("u1", &h).await, None);
    // The stale disk file is removed by the read that found it expired.
    assert_eq!(cache.disk_entries().await, 0);
}

#[tokio::test]
async fn test_cleanup_removes_expired_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_millis(100));
    let h = RequestHeaders::new();

    cache.set("old", &json!("a"), &h).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.set("new", &json!("b"), &h).await.unwrap();
    let size_before = cache.disk_usage().await;

    let report = cache.cleanup().await;
    assert_eq!(report.memory_removed, 1);
    assert_eq!(report.disk_removed, 1);
    assert!(report.bytes_freed > 0);
    assert_eq!(cache.disk_usage().await, size_before - report.bytes_freed);

    let key = CacheKey::for_request("old", &h);
    assert!(!tmp
        .path()
        .join("github-api")
        .join(format!("{}.json", key))
        .exists());
    assert_eq!(cache.get::<Value>("new", &h).await, Some(json!("b")));
}

#[tokio::test]
async fn test_disk_file_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let h = headers(&[("accept", "application/json")]);

    cache.set("https://x/y", &json!({"k": true}), &h).await.unwrap();

    let key = CacheKey::for_request("https://x/y", &h);
    let path = tmp.path().join("github-api").join(format!("{}.json", key));
    let on_disk: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(on_disk["data"], json!({"k": true}));
    assert!(on_disk["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_headers_are_part_of_the_key() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let json_accept = headers(&[("accept", "application/json")]);
    let raw_accept = headers(&[("accept", "application/vnd.github.raw")]);

    cache.set("u", &json!(1), &json_accept).await.unwrap();
    assert_eq!(cache.get::<Value>("u", &json_accept).await, Some(json!(1)));
    assert_eq!(cache.get::<Value>("u", &raw_accept).await, None);
    assert_eq!(cache.get::<Value>("u", &RequestHeaders::new()).await, None);
}

#[tokio::test]
async fn test_corrupt_disk_file_is_a_miss() {
    let tmp = tempfile::tempdir().unwrap();
    let h = RequestHeaders::new();
    api_cache(tmp.path(), Duration::from_secs(60))
        .set("u", &json!(1), &h)
        .await
        .unwrap();

    let key = CacheKey::for_request("u", &h);
    let path = tmp.path().join("github-api").join(format!("{}.json", key));
    std::fs::write(&path, b"{ not json").unwrap();

    let reopened = api_cache(tmp.path(), Duration::from_secs(60));
    assert_eq!(reopened.get::<Value>("u", &h).await, None);
    assert!(!path.exists());
    assert_eq!(reopened.stats().await.disk_errors, 1);
}

#[tokio::test]
async fn test_fetches_are_rate_limited() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ApiCache::new(
        ApiCacheConfig::new(tmp.path()).with_rate_limit(
            RateLimiterConfig::new()
                .with_max_requests(2)
                .with_time_window(Duration::from_millis(200)),
        ),
    );
    let h = RequestHeaders::new();

    let start = tokio::time::Instant::now();
    for i in 0..3 {
        let id = format!("u{}", i);
        let v: Value = cache
            .get_or_fetch(&id, &h, move || async move { Ok::<_, std::io::Error>(json!(i)) })
            .await
            .unwrap();
        assert_eq!(v, json!(i));
    }
    // The third fetch waits for the first to leave the window.
    assert!(start.elapsed() >= Duration::from_millis(180));

    let stats = cache.stats().await.rate_limiter;
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.throttled_requests, 1);
}

#[tokio::test]
async fn test_cache_hits_do_not_consume_rate_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ApiCache::new(
        ApiCacheConfig::new(tmp.path()).with_rate_limit(
            RateLimiterConfig::new()
                .with_max_requests(1)
                .with_time_window(Duration::from_secs(60)),
        ),
    );
    let h = RequestHeaders::new();

    for _ in 0..5 {
        let v: Value = cache
            .get_or_fetch("same", &h, || async { Ok::<_, std::io::Error>(json!("x")) })
            .await
            .unwrap();
        assert_eq!(v, json!("x"));
    }
    assert_eq!(cache.rate_limiter().stats().await.total_requests, 1);
}

async fn exploding_fetch() -> Result<Value, std::io::Error> {
    panic!("upstream client bug")
}

#[tokio::test]
async fn test_panicking_fetch_does_not_wedge_the_key() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let h = RequestHeaders::new();

    let err = cache
        .get_or_fetch::<Value, _, _, _>("u", &h, exploding_fetch)
        .await
        .unwrap_err();
    assert!(err.is_fetch());
    assert_eq!(cache.stats().await.pending_fetches, 0);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let value: Value = cache
        .get_or_fetch("u", &h, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(json!("ok"))
        })
        .await
        .unwrap();
    assert_eq!(value, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().await.fetch_failures, 1);
    assert_eq!(cache.get::<Value>("u", &h).await, Some(json!("ok")));
}

#[tokio::test]
async fn test_clear_drops_results_of_in_flight_fetches() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_secs(60));
    let h = RequestHeaders::new();

    let slow = {
        let cache = cache.clone();
        let h = h.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch::<Value, _, _, _>("u", &h, || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, std::io::Error>(json!({"stale": true}))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.stats().await.pending_fetches, 1);

    cache.clear().await;
    assert_eq!(cache.stats().await.pending_fetches, 0);

    // The waiter still gets its value; the cache does not keep it.
    assert_eq!(slow.await.unwrap().unwrap(), json!({"stale": true}));
    assert!(cache.get::<Value>("u", &h).await.is_none());
    assert_eq!(cache.disk_entries().await, 0);
}

#[tokio::test]
async fn test_foreign_files_in_cache_dir_are_left_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = api_cache(tmp.path(), Duration::from_millis(50));
    let h = RequestHeaders::new();

    cache.set("https://x/y", &json!(1), &h).await.unwrap();
    let notes = tmp.path().join("github-api").join("notes.json");
    std::fs::write(&notes, b"not a cache entry").unwrap();
    assert_eq!(cache.disk_entries().await, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = cache.cleanup().await;
    assert_eq!(report.disk_removed, 1);
    assert!(notes.exists());
    assert_eq!(cache.disk_entries().await, 0);
}
