use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub max_requests: usize,
    pub time_window: Duration,
    /// Calls recorded inside the trailing window.
    pub in_window: usize,
    /// Estimated wait time until another call is admitted (ms), if the window is full.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub throttled_requests: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum calls admitted inside one trailing window.
    pub max_requests: usize,
    /// Length of the trailing window.
    pub time_window: Duration,
}

impl RateLimiterConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self {
            max_requests: 60,
            time_window: Duration::from_secs(60),
        }
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct State {
    /// Admission instants, oldest first.
    calls: VecDeque<Instant>,
    stats: RateLimiterStats,
}

impl State {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_for_slot(&self, now: Instant, cfg: &RateLimiterConfig) -> Option<Duration> {
        if self.calls.len() < cfg.max_requests {
            return None;
        }
        let oldest = *self.calls.front()?;
        Some(cfg.time_window.saturating_sub(now.duration_since(oldest)))
    }
}

/// Sliding-window rate limiter.
///
/// Keeps the admission time of every call inside the trailing window, so a
/// burst is released gradually as old calls age out rather than all at once
/// at a bucket boundary. A `max_requests` of zero disables limiting.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    /// Wait until another call fits in the window, then record it.
    pub async fn wait_for_next(&self) {
        let cfg = &self.cfg;
        let mut throttled = false;

        loop {
            let wait_duration = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                st.prune(now, cfg.time_window);

                match st.wait_for_slot(now, cfg) {
                    Some(wait) if cfg.max_requests > 0 => {
                        if !throttled {
                            throttled = true;
                            st.stats.throttled_requests += 1;
                        }
                        wait
                    }
                    _ => {
                        st.calls.push_back(now);
                        st.stats.total_requests += 1;
                        return;
                    }
                }
            };

            tracing::debug!(
                wait_ms = wait_duration.as_millis() as u64,
                "rate limit window full, waiting"
            );
            // A zero wait still yields so the oldest call is pruned on the next pass.
            tokio::time::sleep(wait_duration.max(Duration::from_millis(1))).await;
        }
    }

    /// Record a call only if it fits in the window right now.
    pub async fn try_acquire(&self) -> bool {
        let mut st = self.state.lock().await;
        let now = Instant::now();
        st.prune(now, self.cfg.time_window);
        if self.cfg.max_requests > 0 && st.calls.len() >= self.cfg.max_requests {
            return false;
        }
        st.calls.push_back(now);
        st.stats.total_requests += 1;
        true
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        let now = Instant::now();
        st.prune(now, cfg.time_window);

        let estimated_wait_ms = if cfg.max_requests == 0 {
            None
        } else {
            st.wait_for_slot(now, cfg).map(|d| d.as_millis() as u64)
        };

        RateLimiterSnapshot {
            max_requests: cfg.max_requests,
            time_window: cfg.time_window,
            in_window: st.calls.len(),
            estimated_wait_ms,
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        self.state.lock().await.stats
    }

    /// Forget recorded calls and counters.
    pub async fn reset(&self) {
        *self.state.lock().await = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_ms: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_requests(max)
                .with_time_window(Duration::from_millis(window_ms)),
        )
    }

    #[test]
    fn test_rate_limiter_config_builder() {
        let config = RateLimiterConfig::new()
            .with_max_requests(100)
            .with_time_window(Duration::from_secs(5));
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.time_window, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_calls_under_limit_do_not_wait() {
        let limiter = limiter(5, 1_000);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.wait_for_next().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));

        let stats = limiter.stats().await;
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.throttled_requests, 0);
    }

    #[tokio::test]
    async fn test_extra_call_waits_for_window() {
        let limiter = limiter(2, 200);
        let start = std::time::Instant::now();
        limiter.wait_for_next().await;
        limiter.wait_for_next().await;
        limiter.wait_for_next().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(180), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1_000), "elapsed {:?}", elapsed);

        let stats = limiter.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.throttled_requests, 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_try_acquire() {
        let limiter = limiter(3, 60_000);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);

        // Fourth should fail (window full)
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = limiter(2, 50);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_zero_max_is_unlimited() {
        let limiter = limiter(0, 1_000);
        for _ in 0..100 {
            limiter.wait_for_next().await;
        }
        assert!(limiter.snapshot().await.estimated_wait_ms.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reports_wait() {
        let limiter = limiter(1, 10_000);
        limiter.wait_for_next().await;

        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.in_window, 1);
        let wait = snapshot.estimated_wait_ms.unwrap();
        assert!(wait > 9_000 && wait <= 10_000);

        limiter.reset().await;
        assert_eq!(limiter.snapshot().await.in_window, 0);
        assert_eq!(limiter.stats().await, RateLimiterStats::default());
    }
}
