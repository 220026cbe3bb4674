//! Cached value record shared by the memory and disk tiers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    /// Write time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            timestamp: now_millis(),
        }
    }

    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }

    /// Valid while strictly younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: i64) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.age_millis(now) < ttl_ms
    }
}
