//! Health monitor — periodic sweep that revives stalled tasks.
//!
//! A worker can die silently (panicked send path, lost runtime task). The
//! primary scheduling path never notices, so this sweep compares each active
//! task's `last_activity` against a multiple of its interval and force
//! re-enqueues anything implausibly quiet. Corrective only — it is not part
//! of normal scheduling.

use std::sync::Arc;
use std::time::Duration;

use autopost_core::config::EngineConfig;
use autopost_store::TaskStore;
use chrono::Utc;

use crate::queue::{DispatchQueue, InFlight};

pub struct HealthMonitor {
    store: Arc<TaskStore>,
    queue: Arc<DispatchQueue>,
    in_flight: Arc<InFlight>,
    cfg: EngineConfig,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<TaskStore>,
        queue: Arc<DispatchQueue>,
        in_flight: Arc<InFlight>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            in_flight,
            cfg,
        }
    }

    /// One sweep over all tasks. Returns how many were revived.
    pub fn sweep(&self) -> usize {
        let tasks = match self.store.load() {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("health sweep skipped, store unavailable: {e}");
                return 0;
            }
        };

        let now = Utc::now();
        let mut revived = 0;
        for task in tasks.iter().filter(|t| t.active) {
            if self.in_flight.contains(&task.id) {
                // A long policy wait (flood wait against a short interval)
                // looks quiet from here, but the execution is alive and owns
                // the id. Reviving it would start a duplicate.
                continue;
            }
            let threshold = self.cfg.stall_factor as i64 * task.interval_secs as i64;
            let quiet_for = (now - task.last_activity).num_seconds();
            if quiet_for <= threshold {
                continue;
            }

            tracing::warn!(
                "task {} stalled ({quiet_for}s since last activity, threshold {threshold}s), re-enqueueing",
                task.id
            );
            if let Err(e) = self.store.touch_activity(&task.id) {
                tracing::warn!("could not reset activity for task {}: {e}", task.id);
                continue;
            }
            self.queue.enqueue(task);
            revived += 1;
        }

        if revived > 0 {
            tracing::info!("health sweep revived {revived} stalled task(s)");
        }
        revived
    }

    /// Run sweeps forever on the configured period. The first sweep happens
    /// one full period after startup, so freshly seeded tasks whose stored
    /// `last_activity` predates the restart are not double-enqueued.
    pub async fn run(self) {
        let period = Duration::from_secs(self.cfg.health_check_secs);
        tracing::info!("health monitor started (sweep every {}s)", period.as_secs());
        loop {
            tokio::time::sleep(period).await;
            self.sweep();
        }
    }
}
