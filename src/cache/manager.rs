//! Cache manager.

use super::disk::{DiskRead, DiskTier};
use super::entry::{now_millis, CacheEntry};
use super::key::{CacheKey, RequestHeaders};
use crate::error::SharedFetchError;
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats};
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Subdirectory of the cache root holding API responses.
pub const API_CACHE_DIR: &str = "github-api";

#[derive(Debug, Clone)]
pub struct ApiCacheConfig {
    pub dir: PathBuf,
    pub ttl: Duration,
    pub rate_limit: RateLimiterConfig,
}

impl ApiCacheConfig {
    /// Config rooted at `<cache_root>/github-api` with a five minute TTL.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: cache_root.into().join(API_CACHE_DIR),
            ttl: Duration::from_millis(300_000),
            rate_limit: RateLimiterConfig::default(),
        }
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    /// Callers that joined a fetch already in flight.
    pub coalesced: u64,
    pub sets: u64,
    pub disk_errors: u64,
    pub memory_entries: usize,
    pub pending_fetches: usize,
    pub rate_limiter: RateLimiterStats,
}

impl ApiCacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Outcome of [`ApiCache::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiCleanupReport {
    pub memory_removed: usize,
    pub disk_removed: usize,
    pub bytes_freed: u64,
}

impl ApiCleanupReport {
    pub fn removed(&self) -> usize {
        self.memory_removed + self.disk_removed
    }
}

#[derive(Default)]
struct AtomicStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    coalesced: AtomicU64,
    sets: AtomicU64,
    disk_errors: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    fn reset(&self) {
        for c in [
            &self.memory_hits,
            &self.disk_hits,
            &self.misses,
            &self.fetches,
            &self.fetch_failures,
            &self.coalesced,
            &self.sets,
            &self.disk_errors,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

type FetchOutcome = std::result::Result<serde_json::Value, SharedFetchError>;
type PendingFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Clone)]
struct PendingSlot {
    id: u64,
    fetch: PendingFetch,
}

struct Inner {
    config: ApiCacheConfig,
    memory: RwLock<HashMap<CacheKey, CacheEntry>>,
    disk: DiskTier,
    pending: Mutex<HashMap<CacheKey, PendingSlot>>,
    next_fetch_id: AtomicU64,
    /// Bumped by `clear`; fetches started under an older generation do not store.
    generation: AtomicU64,
    limiter: RateLimiter,
    stats: AtomicStats,
}

/// Clears a fetch's pending slot when its task ends, including by panic.
struct PendingGuard {
    inner: Arc<Inner>,
    key: CacheKey,
    id: u64,
    settled: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            pending.remove(&self.key);
        }
        drop(pending);
        if !self.settled {
            AtomicStats::bump(&self.inner.stats.fetch_failures);
            warn!(key = %self.key, "fetch task ended without a result; not caching");
        }
    }
}

/// Memory + disk TTL cache for remote API responses with per-key request
/// coalescing.
///
/// Cloning is cheap and every clone shares the same tiers and pending map.
#[derive(Clone)]
pub struct ApiCache {
    inner: Arc<Inner>,
}

impl ApiCache {
    pub fn new(config: ApiCacheConfig) -> Self {
        let disk = DiskTier::new(config.dir.clone());
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                memory: RwLock::new(HashMap::new()),
                disk,
                pending: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                limiter,
                stats: AtomicStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &ApiCacheConfig {
        &self.inner.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Look up a value, memory tier first, then disk.
    pub async fn get<T: DeserializeOwned>(
        &self,
        identifier: &str,
        headers: &RequestHeaders,
    ) -> Option<T> {
        let key = CacheKey::for_request(identifier, headers);
        let value = self.inner.lookup(&key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key = %key, error = %e, "cached value does not match requested type");
                None
            }
        }
    }

    /// Store a value in both tiers, stamped with the current time.
    pub async fn set<T: Serialize>(
        &self,
        identifier: &str,
        value: &T,
        headers: &RequestHeaders,
    ) -> Result<()> {
        let key = CacheKey::for_request(identifier, headers);
        let value = serde_json::to_value(value)?;
        self.inner.store(key, value).await
    }

    /// Return the cached value, or fetch it once no matter how many callers ask.
    ///
    /// Concurrent callers for the same `(identifier, headers)` share a single
    /// in-flight fetch and all observe its outcome. The fetch runs on its own
    /// task, so it completes and populates the cache even if every caller is
    /// dropped. Failures are returned as [`Error::Fetch`] and never cached.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        identifier: &str,
        headers: &RequestHeaders,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let key = CacheKey::for_request(identifier, headers);

        if let Some(value) = self.inner.lookup(&key).await {
            return Ok(serde_json::from_value(value)?);
        }

        let in_flight = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = pending.get(&key) {
                AtomicStats::bump(&self.inner.stats.coalesced);
                debug!(key = %key, "joining in-flight fetch");
                existing.fetch.clone()
            } else if let Some(value) = self.inner.memory_lookup(&key) {
                // A fetch finished between the tier lookup and taking the lock.
                return Ok(serde_json::from_value(value)?);
            } else {
                let fut = fetch();
                let slot = Arc::clone(&self.inner).spawn_fetch(key.clone(), identifier.to_owned(), fut);
                let job = slot.fetch.clone();
                pending.insert(key, slot);
                job
            }
        };

        let value = in_flight.await.map_err(Error::Fetch)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Remove one key from both tiers.
    pub async fn delete(&self, identifier: &str, headers: &RequestHeaders) -> bool {
        let key = CacheKey::for_request(identifier, headers);
        let in_memory = self.inner.memory_write().remove(&key).is_some();
        let on_disk = self.inner.disk.remove(&key).await;
        in_memory || on_disk
    }

    /// Drop every memory entry and disk file older than the TTL.
    pub async fn cleanup(&self) -> ApiCleanupReport {
        let ttl = self.inner.config.ttl;
        let now = now_millis();

        let memory_removed = {
            let mut memory = self.inner.memory_write();
            let before = memory.len();
            memory.retain(|_, entry| entry.is_fresh(ttl, now));
            before - memory.len()
        };
        let (disk_removed, bytes_freed) = self.inner.disk.remove_expired(ttl, now).await;

        let report = ApiCleanupReport {
            memory_removed,
            disk_removed,
            bytes_freed,
        };
        info!(
            memory_removed,
            disk_removed, bytes_freed, "API cache cleanup finished"
        );
        report
    }

    /// Wipe both tiers and reset counters.
    ///
    /// Fetches still in flight deliver their result to the callers already
    /// waiting on them but no longer write it into the cache.
    pub async fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.memory_write().clear();
        self.inner.disk.clear().await;
        self.inner.stats.reset();
        self.inner.limiter.reset().await;
        info!("API cache cleared");
    }

    /// Bytes held by the disk tier.
    pub async fn disk_usage(&self) -> u64 {
        self.inner.disk.usage().await
    }

    pub async fn disk_entries(&self) -> usize {
        self.inner.disk.file_count().await
    }

    pub async fn stats(&self) -> ApiCacheStats {
        let rate_limiter = self.inner.limiter.stats().await;
        let memory_entries = self.inner.memory_read().len();
        let pending_fetches = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let s = &self.inner.stats;
        ApiCacheStats {
            memory_hits: s.memory_hits.load(Ordering::Relaxed),
            disk_hits: s.disk_hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            fetches: s.fetches.load(Ordering::Relaxed),
            fetch_failures: s.fetch_failures.load(Ordering::Relaxed),
            coalesced: s.coalesced.load(Ordering::Relaxed),
            sets: s.sets.load(Ordering::Relaxed),
            disk_errors: s.disk_errors.load(Ordering::Relaxed),
            memory_entries,
            pending_fetches,
            rate_limiter,
        }
    }
}

impl Inner {
    fn memory_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.memory.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh memory entry, evicting a stale one.
    fn memory_lookup(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = now_millis();
        {
            let memory = self.memory_read();
            match memory.get(key) {
                Some(entry) if entry.is_fresh(self.config.ttl, now) => {
                    return Some(entry.data.clone());
                }
                None => return None,
                Some(_) => {}
            }
        }
        self.memory_write().remove(key);
        None
    }

    async fn lookup(&self, key: &CacheKey) -> Option<serde_json::Value> {
        if let Some(value) = self.memory_lookup(key) {
            AtomicStats::bump(&self.stats.memory_hits);
            debug!(key = %key, "API cache memory hit");
            return Some(value);
        }

        match self.disk.read(key, self.config.ttl, now_millis()).await {
            DiskRead::Hit(entry) => {
                AtomicStats::bump(&self.stats.disk_hits);
                debug!(key = %key, "API cache disk hit");
                let value = entry.data.clone();
                self.memory_write().insert(key.clone(), entry);
                Some(value)
            }
            DiskRead::Failed => {
                AtomicStats::bump(&self.stats.disk_errors);
                AtomicStats::bump(&self.stats.misses);
                None
            }
            DiskRead::Expired | DiskRead::Miss => {
                AtomicStats::bump(&self.stats.misses);
                None
            }
        }
    }

    async fn store(&self, key: CacheKey, value: serde_json::Value) -> Result<()> {
        let entry = CacheEntry::new(value);
        let bytes = serde_json::to_vec(&entry)?;
        self.memory_write().insert(key.clone(), entry);
        if !self.disk.write(&key, &bytes).await {
            AtomicStats::bump(&self.stats.disk_errors);
        }
        AtomicStats::bump(&self.stats.sets);
        Ok(())
    }

    fn spawn_fetch<T, Fut, E>(
        self: Arc<Self>,
        key: CacheKey,
        identifier: String,
        fut: Fut,
    ) -> PendingSlot
    where
        T: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let mut guard = PendingGuard {
                inner: Arc::clone(&self),
                key: key.clone(),
                id,
                settled: false,
            };
            self.limiter.wait_for_next().await;
            AtomicStats::bump(&self.stats.fetches);
            debug!(key = %key, identifier = %identifier, "fetching remote resource");

            let outcome: FetchOutcome = match fut.await {
                Ok(value) => serde_json::to_value(&value).map_err(|e| Arc::new(e) as SharedFetchError),
                Err(e) => {
                    let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
                    Err(SharedFetchError::from(boxed))
                }
            };

            guard.settled = true;

            match &outcome {
                Ok(_) if self.generation.load(Ordering::SeqCst) != generation => {
                    debug!(key = %key, "cache cleared during fetch; result not stored");
                }
                Ok(value) => {
                    // Only an unserializable entry can fail here, and `value` already serialized.
                    let _ = self.store(key.clone(), value.clone()).await;
                }
                Err(e) => {
                    AtomicStats::bump(&self.stats.fetch_failures);
                    debug!(key = %key, error = %e, "remote fetch failed; not caching");
                }
            }

            drop(guard);
            outcome
        });

        let fetch = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join) => Err(Arc::new(join) as SharedFetchError),
            }
        }
        .boxed()
        .shared();
        PendingSlot { id, fetch }
    }
}
