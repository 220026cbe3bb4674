use super::{CacheCore, IntegratedCache};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Periodic budget check running on its own task.
///
/// Holds only a weak reference, so dropping the last cache handle ends the
/// task at its next tick even without an explicit shutdown.
pub(super) struct Maintenance {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Maintenance {
    pub(super) fn spawn(core: Weak<CacheCore>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = core.upgrade() else {
                    break;
                };
                let cache = IntegratedCache { inner };
                match cache.run_maintenance().await {
                    Ok(Some(report)) => debug!(bytes_freed = report.bytes_freed, "scheduled cleanup ran"),
                    Ok(None) => debug!("scheduled check: within budget"),
                    Err(e) => warn!(error = %e, "scheduled cleanup failed"),
                }
            }
            debug!("maintenance task stopped");
        });
        Self { token, handle }
    }

    pub(super) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}
