//! Network reachability signal consumed by the coordinator.
//!
//! The cache never probes the network itself; it only asks a
//! [`ConnectivityProbe`] whether a remote fetch should be attempted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub online: bool,
    pub checks: u64,
    pub offline_checks: u64,
    pub last_change: Option<DateTime<Utc>>,
}

/// Source of the online/offline signal.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;

    /// Begin background monitoring, if the probe does any.
    async fn start(&self) {}

    async fn stop(&self) {}

    fn network_stats(&self) -> NetworkStats;
}

/// Probe whose answer is set by the application (or a test).
pub struct StaticProbe {
    online: AtomicBool,
    checks: AtomicU64,
    offline_checks: AtomicU64,
    last_change: Mutex<Option<DateTime<Utc>>>,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            checks: AtomicU64::new(0),
            offline_checks: AtomicU64::new(0),
            last_change: Mutex::new(None),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) != online {
            *self.last_change.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
            tracing::info!(online, "connectivity changed");
        }
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let online = self.online.load(Ordering::SeqCst);
        if !online {
            self.offline_checks.fetch_add(1, Ordering::Relaxed);
        }
        online
    }

    fn network_stats(&self) -> NetworkStats {
        NetworkStats {
            online: self.online.load(Ordering::SeqCst),
            checks: self.checks.load(Ordering::Relaxed),
            offline_checks: self.offline_checks.load(Ordering::Relaxed),
            last_change: *self.last_change.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
