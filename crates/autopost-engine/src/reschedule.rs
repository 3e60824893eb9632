//! Next-wake computation and the re-enqueue step.

use std::sync::Arc;
use std::time::Duration;

use autopost_store::TaskStore;
use rand::Rng;

use crate::queue::DispatchQueue;

/// Compute the sleep before the next send: `interval ± jitter`, floored at
/// `min_interval`. The floor holds even under maximum negative jitter.
pub fn effective_interval(interval_secs: u64, jitter_secs: u64, min_interval_secs: u64) -> Duration {
    let base = interval_secs as i64;
    let jitter = if jitter_secs == 0 {
        0
    } else {
        let j = jitter_secs as i64;
        rand::thread_rng().gen_range(-j..=j)
    };
    Duration::from_secs((base + jitter).max(min_interval_secs as i64).max(0) as u64)
}

/// Re-enqueues a task after its outcome has been fully processed.
pub struct Rescheduler {
    store: Arc<TaskStore>,
    queue: Arc<DispatchQueue>,
}

impl Rescheduler {
    pub fn new(store: Arc<TaskStore>, queue: Arc<DispatchQueue>) -> Self {
        Self { store, queue }
    }

    /// Re-enqueue unless the task went inactive (or was deleted) since
    /// dequeue. Re-reading the store here closes the race between
    /// deactivation and an in-flight execution, and picks up any interval
    /// edit made while the task was running.
    pub fn requeue_if_active(&self, id: &str) -> bool {
        match self.store.get(id) {
            Ok(task) if task.active => {
                self.queue.enqueue(&task);
                true
            }
            Ok(_) => {
                tracing::debug!("task {id} deactivated, not re-enqueued");
                false
            }
            Err(e) => {
                tracing::debug!("task {id} not re-enqueued: {e}");
                false
            }
        }
    }
}
