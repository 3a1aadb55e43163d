//! Periodic staleness sweep over the server pool.

use std::time::Duration;

use meridian_core::SharedServerPool;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Spawns a background Tokio task that times out servers whose heartbeats stopped.
///
/// The task runs until aborted.
pub fn spawn_sweeper(pool: SharedServerPool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick fires at once; give servers a full interval to report
        interval.tick().await;
        info!(interval = ?every, "staleness sweep started");

        loop {
            interval.tick().await;

            let timed_out = pool.sweep();
            if timed_out.is_empty() {
                continue;
            }
            debug!(
                count = timed_out.len(),
                eligible = pool.eligible_count(),
                "sweep timed out edge servers"
            );
        }
    })
}
