use std::sync::Arc;
use std::time::Duration;

use concierge_agent::guard::SecurityGuard;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Periodically drops rate windows that have gone idle. Eviction is
/// unobservable to users: an evicted user starts from an empty window,
/// which is what their purged window already was.
pub fn spawn_idle_sweeper(guard: Arc<SecurityGuard>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = guard.evict_idle_windows();
            debug!(
                event_name = "system.sweeper.tick",
                evicted,
                tracked = guard.tracked_users(),
                "idle rate windows swept"
            );
        }
    })
}
