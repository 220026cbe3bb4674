//! # Resilience Primitives Module
//!
//! Outbound throttling for remote fetches.
//!
//! ## Rate Limiter
//!
//! [`rate_limiter::RateLimiter`] admits at most `max_requests` calls inside any
//! trailing `time_window`. Callers that would exceed it are suspended until the
//! oldest recorded call ages out of the window:
//!
//! ```rust
//! use tiercache::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let config = RateLimiterConfig::new()
//!     .with_max_requests(60)
//!     .with_time_window(Duration::from_secs(60));
//! let limiter = RateLimiter::new(config);
//!
//! limiter.wait_for_next().await;
//! // Proceed with request...
//! # }
//! ```

pub mod rate_limiter;
