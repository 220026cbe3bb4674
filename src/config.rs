//! Cache settings: defaults, builder, environment and file overlays.

use crate::cache::ApiCacheConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::templates::TemplateCacheConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// A subsystem that takes part in budget eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheSource {
    #[serde(rename = "templates")]
    Templates,
    #[serde(rename = "github-api")]
    GithubApi,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Templates => "templates",
            CacheSource::GithubApi => "github-api",
        }
    }
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub cache_dir: PathBuf,
    /// API cache TTL in milliseconds.
    #[serde(rename = "ttl")]
    pub ttl_ms: u64,
    /// Template cache limit in bytes.
    pub max_cache_size: u64,
    /// Budget across both subsystems in bytes.
    pub max_total_size: u64,
    pub compression_level: u32,
    /// Maintenance period in milliseconds.
    #[serde(rename = "cleanupSchedule", alias = "cleanupInterval")]
    pub cleanup_interval_ms: u64,
    pub priority_order: Vec<CacheSource>,
    pub max_requests: usize,
    #[serde(rename = "rateWindow")]
    pub rate_window_ms: u64,
    pub ignore: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            ttl_ms: 300_000,
            max_cache_size: 100 * MIB,
            max_total_size: 200 * MIB,
            compression_level: 6,
            cleanup_interval_ms: 60 * 60 * 1000,
            priority_order: vec![CacheSource::Templates, CacheSource::GithubApi],
            max_requests: 60,
            rate_window_ms: 60_000,
            ignore: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("tiercache"))
        .unwrap_or_else(|| PathBuf::from(".tiercache"))
}

fn config_error(field: &str, message: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("settings"),
    )
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| config_error(name, format!("cannot parse {}={:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

impl CacheSettings {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }
    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }
    pub fn with_max_total_size(mut self, bytes: u64) -> Self {
        self.max_total_size = bytes;
        self
    }
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }
    pub fn with_priority_order(mut self, order: Vec<CacheSource>) -> Self {
        self.priority_order = order;
        self
    }
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.max_requests = max_requests;
        self.rate_window_ms = window.as_millis() as u64;
        self
    }

    /// Defaults overlaid with `TIERCACHE_DIR`, `TIERCACHE_TTL_MS` and
    /// `TIERCACHE_MAX_TOTAL_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("TIERCACHE_DIR") {
            if !dir.trim().is_empty() {
                self.cache_dir = PathBuf::from(dir);
            }
        }
        if let Some(ttl) = parse_env("TIERCACHE_TTL_MS")? {
            self.ttl_ms = ttl;
        }
        if let Some(max) = parse_env("TIERCACHE_MAX_TOTAL_SIZE")? {
            self.max_total_size = max;
        }
        Ok(self)
    }

    /// Read settings from a `.json`, `.yaml` or `.yml` file; missing fields
    /// keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let settings: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .map_err(|e| config_error("file", format!("{}: {}", path.display(), e)))?,
            "json" => serde_json::from_str(&raw)?,
            other => {
                return Err(config_error(
                    "file",
                    format!("unsupported settings format {:?}", other),
                ))
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_total_size == 0 {
            return Err(config_error("maxTotalSize", "budget must be positive"));
        }
        if self.max_cache_size == 0 {
            return Err(config_error("maxCacheSize", "template limit must be positive"));
        }
        if self.rate_window_ms == 0 {
            return Err(config_error("rateWindow", "rate window must be positive"));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(config_error("cleanupSchedule", "cleanup interval must be positive"));
        }
        if self.priority_order.is_empty() {
            return Err(config_error("priorityOrder", "at least one source is required"));
        }
        for (i, source) in self.priority_order.iter().enumerate() {
            if self.priority_order[..i].contains(source) {
                return Err(config_error(
                    "priorityOrder",
                    format!("{} listed more than once", source),
                ));
            }
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn api_cache_config(&self) -> ApiCacheConfig {
        ApiCacheConfig::new(&self.cache_dir)
            .with_ttl(self.ttl())
            .with_rate_limit(
                RateLimiterConfig::new()
                    .with_max_requests(self.max_requests)
                    .with_time_window(Duration::from_millis(self.rate_window_ms)),
            )
    }

    pub fn template_cache_config(&self) -> TemplateCacheConfig {
        TemplateCacheConfig::new(&self.cache_dir)
            .with_max_size(self.max_cache_size)
            .with_compression_level(self.compression_level)
            .with_ignore(self.ignore.clone())
    }
}
