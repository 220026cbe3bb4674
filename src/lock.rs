//! Advisory `lock.json` marking maintenance in progress.
//!
//! Nothing blocks on this lock. It tells another process (or a human) that a
//! cleanup was running; a foreign lock is reported and then ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "lock.json";

/// Foreign locks older than this are considered abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub locked: bool,
    pub process_id: u32,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

impl LockInfo {
    fn is_live_foreign(&self, now: DateTime<Utc>) -> bool {
        let stale = chrono::Duration::from_std(STALE_AFTER).unwrap_or_else(|_| chrono::Duration::zero());
        self.locked && self.process_id != std::process::id() && now - self.timestamp < stale
    }
}

pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            path: cache_root.join(LOCK_FILE),
        }
    }

    pub async fn read(&self) -> Option<LockInfo> {
        let bytes = fs::read(&self.path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Mark `operation` as running in this process.
    pub async fn acquire(&self, operation: &str) {
        if let Some(existing) = self.read().await {
            if existing.is_live_foreign(Utc::now()) {
                warn!(
                    holder = existing.process_id,
                    operation = %existing.operation,
                    "cache lock held by another process; continuing"
                );
            }
        }
        self.write(true, operation).await;
    }

    pub async fn release(&self, operation: &str) {
        self.write(false, operation).await;
    }

    async fn write(&self, locked: bool, operation: &str) {
        let info = LockInfo {
            locked,
            process_id: std::process::id(),
            operation: operation.to_string(),
            timestamp: Utc::now(),
        };
        let result = match serde_json::to_vec_pretty(&info) {
            Ok(bytes) => {
                if let Some(parent) = self.path.parent() {
                    if let Err(e) = fs::create_dir_all(parent).await {
                        warn!(dir = %parent.display(), error = %e, "cannot create cache lock directory");
                        return;
                    }
                }
                fs::write(&self.path, bytes).await
            }
            Err(e) => Err(std::io::Error::other(e)),
        };
        match result {
            Ok(()) => debug!(locked, operation, "cache lock updated"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "cannot write cache lock"),
        }
    }
}
