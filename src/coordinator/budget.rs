use crate::cache::ApiCacheStats;
use crate::config::CacheSource;
use crate::offline::NetworkStats;
use crate::templates::{EvictionReport, TemplateCacheStats};
use chrono::{DateTime, Utc};

/// Eviction stops once usage is at most this share of the budget.
pub const CLEANUP_TARGET_RATIO: f64 = 0.8;
/// Scheduled maintenance starts eviction above this share of the budget.
pub const MAINTENANCE_TRIGGER_RATIO: f64 = 0.9;

/// Aggregate usage, recomputed from both subsystems on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetState {
    pub total_size: u64,
    pub api_size: u64,
    pub template_size: u64,
    pub max_total_size: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl BudgetState {
    pub fn usage_ratio(&self) -> f64 {
        if self.max_total_size == 0 {
            0.0
        } else {
            self.total_size as f64 / self.max_total_size as f64
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_size > self.max_total_size
    }

    pub fn size_of(&self, source: CacheSource) -> u64 {
        match source {
            CacheSource::Templates => self.template_size,
            CacheSource::GithubApi => self.api_size,
        }
    }
}

pub(crate) fn ratio_of(max: u64, ratio: f64) -> u64 {
    (max as f64 * ratio) as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCleanup {
    pub source: CacheSource,
    pub bytes_freed: u64,
    /// Entries removed (API files, or template versions).
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartCleanupReport {
    pub bytes_freed: u64,
    /// Sources actually cleaned, in priority order.
    pub sources: Vec<SourceCleanup>,
    pub before: BudgetState,
    pub after: BudgetState,
}

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Nothing was done: the probe reports no connectivity.
    Offline,
    Synchronized {
        api_entries_removed: usize,
        template_eviction: EvictionReport,
        budget: BudgetState,
    },
}

impl SyncOutcome {
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncOutcome::Offline)
    }
}

#[derive(Debug, Clone)]
pub struct IntegratedStats {
    pub online: bool,
    pub budget: BudgetState,
    pub api: ApiCacheStats,
    pub templates: TemplateCacheStats,
    pub network: Option<NetworkStats>,
}
