//! Integrated cache: offline routing, shared budget and maintenance lifecycle.

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::fetch::{BoxError, RemoteFetcher};
use tiercache::lock::{CacheLock, LOCK_FILE};
use tiercache::{
    CacheSettings, CacheSource, Error, IntegratedCache, RequestHeaders, StaticProbe, SyncOutcome,
    TemplateKind,
};

/// Answers every request with `{"url": <identifier>}` and counts calls.
#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteFetcher for CountingFetcher {
    async fn fetch(
        &self,
        identifier: &str,
        _headers: &RequestHeaders,
    ) -> std::result::Result<Value, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "url": identifier }))
    }
}

fn noise(seed: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block = Sha256::digest(seed.as_bytes());
    while out.len() < len {
        out.extend_from_slice(&block);
        block = Sha256::digest(block);
    }
    out.truncate(len);
    out
}

fn noisy_source(root: &Path, name: &str, len: usize) -> PathBuf {
    let dir = root.join("sources").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("payload.bin"), noise(name, len)).unwrap();
    dir
}

async fn build(
    settings: CacheSettings,
    probe: Arc<StaticProbe>,
    fetcher: Arc<CountingFetcher>,
) -> IntegratedCache {
    IntegratedCache::builder(settings)
        .with_probe(probe)
        .with_fetcher(fetcher)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_offline_miss_never_fetches() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let cache = build(
        CacheSettings::new(tmp.path()),
        Arc::new(StaticProbe::offline()),
        fetcher.clone(),
    )
    .await;

    let err = cache
        .get_github_data::<Value>("https://api.github.com/repos/a/b", &RequestHeaders::new())
        .await
        .unwrap_err();
    assert!(err.is_offline());
    assert!(matches!(err, Error::Offline { ref identifier } if identifier.contains("repos/a/b")));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cached_data_served_while_offline() {
    let tmp = tempfile::tempdir().unwrap();
    let probe = Arc::new(StaticProbe::online());
    let fetcher = Arc::new(CountingFetcher::default());
    let cache = build(CacheSettings::new(tmp.path()), probe.clone(), fetcher.clone()).await;
    let url = "https://api.github.com/repos/a/b";
    let h = RequestHeaders::new();

    let online: Value = cache.get_github_data(url, &h).await.unwrap();
    assert_eq!(online["url"], url);

    probe.set_online(false);
    let offline: Value = cache.get_github_data(url, &h).await.unwrap();
    assert_eq!(offline, online);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats().await;
    assert!(!stats.online);
    assert!(stats.network.unwrap().offline_checks >= 1);
}

#[tokio::test]
async fn test_missing_probe_means_online() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let cache = IntegratedCache::builder(CacheSettings::new(tmp.path()))
        .with_fetcher(fetcher.clone())
        .build()
        .await
        .unwrap();

    assert!(cache.is_online().await);
    let _: Value = cache
        .get_github_data("https://api.github.com/x", &RequestHeaders::new())
        .await
        .unwrap();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_settings_rejected_at_build() {
    let tmp = tempfile::tempdir().unwrap();
    let result = IntegratedCache::builder(CacheSettings::new(tmp.path()).with_priority_order(vec![]))
        .build()
        .await;
    assert!(matches!(result, Err(Error::Configuration { .. })));
}

#[tokio::test]
async fn test_smart_cleanup_brings_usage_under_target() {
    let tmp = tempfile::tempdir().unwrap();
    let budget = 20_000;
    let cache = build(
        CacheSettings::new(tmp.path().join("cache")).with_max_total_size(budget),
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;

    for i in 0..8 {
        let name = format!("tpl{}", i);
        let src = noisy_source(tmp.path(), &name, 3 * 1024);
        cache
            .templates()
            .cache_template(TemplateKind::Project, &name, &src, "1")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let before = cache.budget_state().await;
    assert!(before.is_over_budget());

    let report = cache.smart_cleanup().await.unwrap();
    assert!(report.after.total_size <= budget * 8 / 10);
    assert_eq!(report.sources[0].source, CacheSource::Templates);
    assert!(report.bytes_freed > 0);
    assert!(report.after.last_cleanup.is_some());

    // Oldest templates went first.
    assert!(cache
        .get_template(TemplateKind::Project, "tpl0", None)
        .await
        .is_none());
    assert!(cache
        .get_template(TemplateKind::Project, "tpl7", None)
        .await
        .is_some());

    let lock = CacheLock::new(&tmp.path().join("cache")).read().await.unwrap();
    assert!(!lock.locked);
    assert!(tmp.path().join("cache").join(LOCK_FILE).exists());
}

#[tokio::test]
async fn test_cache_template_cleans_up_when_over_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let budget = 10_000;
    let cache = build(
        CacheSettings::new(tmp.path().join("cache")).with_max_total_size(budget),
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;

    for i in 0..4 {
        let name = format!("tpl{}", i);
        let src = noisy_source(tmp.path(), &name, 3 * 1024);
        cache
            .templates()
            .cache_template(TemplateKind::Tool, &name, &src, "1")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.budget_state().await.is_over_budget());

    let src = noisy_source(tmp.path(), "fresh", 1024);
    cache
        .cache_template(TemplateKind::Tool, "fresh", &src, "1")
        .await
        .unwrap();

    let state = cache.budget_state().await;
    assert!(state.last_cleanup.is_some());
    assert!(!state.is_over_budget());
    assert!(cache
        .get_template(TemplateKind::Tool, "fresh", None)
        .await
        .is_some());
}

#[tokio::test]
async fn test_priority_order_stops_after_enough_is_freed() {
    let tmp = tempfile::tempdir().unwrap();
    let budget = 20_000;
    let settings = CacheSettings::new(tmp.path().join("cache"))
        .with_max_total_size(budget)
        .with_ttl(Duration::from_millis(50))
        .with_priority_order(vec![CacheSource::GithubApi, CacheSource::Templates]);
    let cache = build(
        settings,
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;

    for i in 0..2 {
        let name = format!("tpl{}", i);
        let src = noisy_source(tmp.path(), &name, 2 * 1024);
        cache
            .templates()
            .cache_template(TemplateKind::Tool, &name, &src, "1")
            .await
            .unwrap();
    }
    let h = RequestHeaders::new();
    for i in 0..3 {
        let body = hex::encode(noise(&format!("api{}", i), 4 * 1024));
        cache
            .api()
            .set(&format!("https://api.github.com/{}", i), &json!({ "body": body }), &h)
            .await
            .unwrap();
    }
    let before = cache.budget_state().await;
    assert!(before.total_size > budget * 8 / 10);
    assert!(before.template_size <= budget * 8 / 10);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = cache.smart_cleanup().await.unwrap();

    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].source, CacheSource::GithubApi);
    assert_eq!(report.sources[0].removed, 3);
    assert_eq!(report.after.api_size, 0);
    assert_eq!(report.after.template_size, before.template_size);
}

#[tokio::test]
async fn test_synchronize_needs_connectivity() {
    let tmp = tempfile::tempdir().unwrap();
    let probe = Arc::new(StaticProbe::offline());
    let cache = build(
        CacheSettings::new(tmp.path()).with_ttl(Duration::from_millis(20)),
        probe.clone(),
        Arc::new(CountingFetcher::default()),
    )
    .await;
    cache
        .api()
        .set("https://api.github.com/stale", &json!(1), &RequestHeaders::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(cache.synchronize().await.unwrap().is_offline());
    assert_eq!(cache.api().disk_entries().await, 1);

    probe.set_online(true);
    match cache.synchronize().await.unwrap() {
        SyncOutcome::Synchronized {
            api_entries_removed,
            template_eviction,
            ..
        } => {
            assert_eq!(api_entries_removed, 2);
            assert!(template_eviction.evicted.is_empty());
        }
        SyncOutcome::Offline => panic!("expected synchronization while online"),
    }
    assert_eq!(cache.api().disk_entries().await, 0);
    assert!(cache.stats().await.templates.last_update_check.is_some());
}

#[tokio::test]
async fn test_maintenance_task_enforces_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let budget = 10_000;
    let cache = build(
        CacheSettings::new(tmp.path().join("cache"))
            .with_max_total_size(budget)
            .with_cleanup_interval(Duration::from_millis(50)),
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;

    for i in 0..4 {
        let name = format!("tpl{}", i);
        let src = noisy_source(tmp.path(), &name, 3 * 1024);
        cache
            .templates()
            .cache_template(TemplateKind::Tool, &name, &src, "1")
            .await
            .unwrap();
    }
    assert!(cache.budget_state().await.total_size > budget * 9 / 10);

    cache.init().await;
    cache.init().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    cache.shutdown().await;

    let state = cache.budget_state().await;
    assert!(state.total_size <= budget * 8 / 10);
    assert!(state.last_cleanup.is_some());
}

#[tokio::test]
async fn test_maintenance_leaves_cache_within_budget_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = build(
        CacheSettings::new(tmp.path()),
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;
    let src = noisy_source(tmp.path(), "small", 256);
    cache
        .cache_template(TemplateKind::Tool, "small", &src, "1")
        .await
        .unwrap();

    assert!(cache.run_maintenance().await.unwrap().is_none());
    assert!(cache.budget_state().await.last_cleanup.is_none());
}

#[tokio::test]
async fn test_clear_empties_both_subsystems() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = build(
        CacheSettings::new(tmp.path().join("cache")),
        Arc::new(StaticProbe::online()),
        Arc::new(CountingFetcher::default()),
    )
    .await;
    let _: Value = cache
        .get_github_data("https://api.github.com/x", &RequestHeaders::new())
        .await
        .unwrap();
    let src = noisy_source(tmp.path(), "t", 512);
    cache
        .cache_template(TemplateKind::Project, "t", &src, "1")
        .await
        .unwrap();
    assert!(cache.budget_state().await.total_size > 0);

    cache.clear().await.unwrap();
    let state = cache.budget_state().await;
    assert_eq!(state.total_size, 0);
    assert!(cache.templates().list().await.is_empty());
    assert!(cache
        .api()
        .get::<Value>("https://api.github.com/x", &RequestHeaders::new())
        .await
        .is_none());
}
