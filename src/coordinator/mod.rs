//! # Budget Coordinator
//!
//! [`IntegratedCache`] puts the API cache and the template cache behind one
//! facade with a shared size budget.
//!
//! - Reads of remote data are routed by the [`ConnectivityProbe`]: offline,
//!   only the cache is consulted and a miss is [`Error::Offline`].
//! - Template writes first check the budget and clean up if it is already
//!   exceeded.
//! - [`IntegratedCache::smart_cleanup`] walks the configured priority order and
//!   stops as soon as usage is back under 80% of the budget.
//! - A maintenance task started by [`IntegratedCache::init`] repeats the budget
//!   check on a timer and cleans up above 90%.

mod budget;
mod maintenance;

pub use budget::{
    BudgetState, IntegratedStats, SmartCleanupReport, SourceCleanup, SyncOutcome,
    CLEANUP_TARGET_RATIO, MAINTENANCE_TRIGGER_RATIO,
};

use crate::cache::{ApiCache, RequestHeaders};
use crate::config::{CacheSettings, CacheSource};
use crate::fetch::{HttpFetcher, RemoteFetcher};
use crate::lock::CacheLock;
use crate::offline::ConnectivityProbe;
use crate::templates::{
    CachedTemplate, ExtractReport, TemplateCache, TemplateKind, TemplateManifestEntry,
};
use crate::{Error, ErrorContext, Result};
use budget::ratio_of;
use chrono::{DateTime, Utc};
use maintenance::Maintenance;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub(crate) struct CacheCore {
    settings: CacheSettings,
    api: ApiCache,
    templates: TemplateCache,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    fetcher: Arc<dyn RemoteFetcher>,
    lock: CacheLock,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
    maintenance: Mutex<Option<Maintenance>>,
}

/// Builder for [`IntegratedCache`].
pub struct IntegratedCacheBuilder {
    settings: CacheSettings,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
}

impl IntegratedCacheBuilder {
    /// Without a probe the cache assumes it is online.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Defaults to [`HttpFetcher`].
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub async fn build(self) -> Result<IntegratedCache> {
        self.settings.validate()?;
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new().map_err(|e| {
                Error::runtime_with_context(
                    format!("cannot build HTTP client: {}", e),
                    ErrorContext::new().with_source("coordinator"),
                )
            })?),
        };
        let api = ApiCache::new(self.settings.api_cache_config());
        let templates = TemplateCache::open(self.settings.template_cache_config()).await;
        let lock = CacheLock::new(&self.settings.cache_dir);

        Ok(IntegratedCache {
            inner: Arc::new(CacheCore {
                settings: self.settings,
                api,
                templates,
                probe: self.probe,
                fetcher,
                lock,
                last_cleanup: Mutex::new(None),
                maintenance: Mutex::new(None),
            }),
        })
    }
}

/// API cache + template cache under one budget.
///
/// One instance per process, shared by cloning.
#[derive(Clone)]
pub struct IntegratedCache {
    inner: Arc<CacheCore>,
}

impl IntegratedCache {
    pub fn builder(settings: CacheSettings) -> IntegratedCacheBuilder {
        IntegratedCacheBuilder {
            settings,
            probe: None,
            fetcher: None,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn api(&self) -> &ApiCache {
        &self.inner.api
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.inner.templates
    }

    /// Start the probe and the maintenance timer. Calling it twice is harmless.
    pub async fn init(&self) {
        if let Some(probe) = &self.inner.probe {
            probe.start().await;
        }
        let mut slot = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(Maintenance::spawn(
                Arc::downgrade(&self.inner),
                self.inner.settings.cleanup_interval(),
            ));
            info!(
                interval_ms = self.inner.settings.cleanup_interval_ms,
                "cache maintenance scheduled"
            );
        }
    }

    /// Stop the maintenance timer and the probe.
    pub async fn shutdown(&self) {
        let maintenance = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(maintenance) = maintenance {
            maintenance.stop().await;
        }
        if let Some(probe) = &self.inner.probe {
            probe.stop().await;
        }
    }

    pub async fn is_online(&self) -> bool {
        match &self.inner.probe {
            Some(probe) => probe.is_online().await,
            None => true,
        }
    }

    /// Cached remote data. Offline, only the cache is consulted.
    pub async fn get_github_data<T>(&self, url: &str, headers: &RequestHeaders) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if !self.is_online().await {
            return match self.inner.api.get::<T>(url, headers).await {
                Some(value) => {
                    debug!(url, "offline: served from cache");
                    Ok(value)
                }
                None => Err(Error::offline(url)),
            };
        }

        let fetcher = Arc::clone(&self.inner.fetcher);
        let owned_url = url.to_owned();
        let owned_headers = headers.clone();
        let value: serde_json::Value = self
            .inner
            .api
            .get_or_fetch(url, headers, move || async move {
                fetcher.fetch(&owned_url, &owned_headers).await
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Cache a template, cleaning up first if the budget is already exceeded.
    pub async fn cache_template(
        &self,
        kind: TemplateKind,
        name: &str,
        source: &Path,
        version: &str,
    ) -> Result<CachedTemplate> {
        let budget = self.budget_state().await;
        if budget.is_over_budget() {
            info!(
                total = budget.total_size,
                max = budget.max_total_size,
                "over budget before template write"
            );
            self.smart_cleanup().await?;
        }
        self.inner
            .templates
            .cache_template(kind, name, source, version)
            .await
    }

    pub async fn get_template(
        &self,
        kind: TemplateKind,
        name: &str,
        version: Option<&str>,
    ) -> Option<TemplateManifestEntry> {
        self.inner.templates.get_template(kind, name, version).await
    }

    pub async fn extract_template(
        &self,
        kind: TemplateKind,
        name: &str,
        target: &Path,
        version: Option<&str>,
    ) -> Result<ExtractReport> {
        self.inner
            .templates
            .extract_to_directory(kind, name, target, version)
            .await
    }

    /// Current aggregate usage, computed from both subsystems.
    pub async fn budget_state(&self) -> BudgetState {
        let api_size = self.inner.api.disk_usage().await;
        let template_size = self.inner.templates.total_size().await;
        BudgetState {
            total_size: api_size + template_size,
            api_size,
            template_size,
            max_total_size: self.inner.settings.max_total_size,
            last_cleanup: *self
                .inner
                .last_cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Clean sources in priority order until usage is at most 80% of the budget.
    pub async fn smart_cleanup(&self) -> Result<SmartCleanupReport> {
        self.inner.lock.acquire("smart-cleanup").await;
        let result = self.smart_cleanup_locked().await;
        self.inner.lock.release("smart-cleanup").await;
        result
    }

    async fn smart_cleanup_locked(&self) -> Result<SmartCleanupReport> {
        let before = self.budget_state().await;
        let target = ratio_of(self.inner.settings.max_total_size, CLEANUP_TARGET_RATIO);
        let mut current = before.clone();
        let mut sources = Vec::new();

        for &source in &self.inner.settings.priority_order {
            if current.total_size <= target {
                break;
            }
            let (bytes_freed, removed) = match source {
                CacheSource::GithubApi => {
                    let report = self.inner.api.cleanup().await;
                    (report.bytes_freed, report.disk_removed)
                }
                CacheSource::Templates => {
                    let allowed = target.saturating_sub(current.api_size);
                    let report = self.inner.templates.evict_until(allowed).await?;
                    (report.bytes_freed, report.evicted.len())
                }
            };
            debug!(source = %source, bytes_freed, removed, "cleanup pass");
            sources.push(SourceCleanup {
                source,
                bytes_freed,
                removed,
            });
            current = self.budget_state().await;
        }

        *self
            .inner
            .last_cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        let after = self.budget_state().await;
        let bytes_freed = sources.iter().map(|s| s.bytes_freed).sum();
        info!(
            bytes_freed,
            before = before.total_size,
            after = after.total_size,
            target,
            "smart cleanup finished"
        );
        Ok(SmartCleanupReport {
            bytes_freed,
            sources,
            before,
            after,
        })
    }

    /// One maintenance round: clean up when usage is above 90% of the budget.
    pub async fn run_maintenance(&self) -> Result<Option<SmartCleanupReport>> {
        let budget = self.budget_state().await;
        let trigger = ratio_of(budget.max_total_size, MAINTENANCE_TRIGGER_RATIO);
        if budget.total_size > trigger {
            self.smart_cleanup().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Expire API entries and enforce the template limit. Meant to run when
    /// connectivity returns; does nothing offline.
    pub async fn synchronize(&self) -> Result<SyncOutcome> {
        if !self.is_online().await {
            info!("cannot synchronize while offline");
            return Ok(SyncOutcome::Offline);
        }
        self.inner.lock.acquire("synchronize").await;
        let result = self.synchronize_locked().await;
        self.inner.lock.release("synchronize").await;
        result
    }

    async fn synchronize_locked(&self) -> Result<SyncOutcome> {
        let api_report = self.inner.api.cleanup().await;
        let template_eviction = self.inner.templates.check_size_limit().await?;
        self.inner.templates.mark_update_check().await?;
        let budget = self.budget_state().await;
        info!(
            api_entries_removed = api_report.removed(),
            templates_evicted = template_eviction.evicted.len(),
            total = budget.total_size,
            "cache synchronized"
        );
        Ok(SyncOutcome::Synchronized {
            api_entries_removed: api_report.removed(),
            template_eviction,
            budget,
        })
    }

    /// Wipe both subsystems.
    pub async fn clear(&self) -> Result<()> {
        self.inner.lock.acquire("clear").await;
        self.inner.api.clear().await;
        let result = self.inner.templates.clear().await;
        self.inner.lock.release("clear").await;
        result
    }

    pub async fn stats(&self) -> IntegratedStats {
        IntegratedStats {
            online: self.is_online().await,
            budget: self.budget_state().await,
            api: self.inner.api.stats().await,
            templates: self.inner.templates.stats().await,
            network: self.inner.probe.as_ref().map(|p| p.network_stats()),
        }
    }
}
