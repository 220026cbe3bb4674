//! # Remote API Response Cache
//!
//! A two-tier TTL cache for responses of remote APIs (GitHub in practice),
//! keyed by a SHA-256 digest of the request identifier and headers.
//!
//! ## Overview
//!
//! - **Memory tier**: a write-through map populated on every write and on disk hits
//! - **Disk tier**: one `<cache_dir>/github-api/<sha256>.json` file per key,
//!   holding `{ "data": ..., "timestamp": <ms> }`
//! - **Coalescing**: concurrent [`ApiCache::get_or_fetch`] calls for the same key
//!   share one in-flight fetch
//! - **Throttling**: every fetch first passes the sliding-window
//!   [`RateLimiter`](crate::resilience::rate_limiter::RateLimiter)
//!
//! Disk failures never reach the caller; the cache keeps working from memory.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ApiCache`] | Memory + disk cache with coalescing and TTL cleanup |
//! | [`ApiCacheConfig`] | Directory, TTL and rate limit settings |
//! | [`CacheKey`] | Stable request digest |
//! | [`CacheEntry`] | Stored value with its write timestamp |
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiercache::cache::{ApiCache, ApiCacheConfig, RequestHeaders};
//! use std::time::Duration;
//!
//! # async fn demo() -> tiercache::Result<()> {
//! let cache = ApiCache::new(ApiCacheConfig::new("/tmp/tiercache").with_ttl(Duration::from_secs(300)));
//! let repo: serde_json::Value = cache
//!     .get_or_fetch("https://api.github.com/repos/o/r", &RequestHeaders::new(), || async {
//!         Ok::<_, std::io::Error>(serde_json::json!({"name": "r"}))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod disk;
mod entry;
mod key;
mod manager;

pub use entry::CacheEntry;
pub use key::{CacheKey, RequestHeaders};
pub use manager::{ApiCache, ApiCacheConfig, ApiCacheStats, ApiCleanupReport, API_CACHE_DIR};
