//! FIFO dispatch queue — `(task id, snapshot)` pairs awaiting execution.
//!
//! No priority: a task that requeues itself lands at the back, so many tasks
//! interleave round-robin over time. Ordering between distinct tasks is not a
//! correctness requirement, only the eventual periodicity of each one.

use std::collections::HashSet;
use std::sync::PoisonError;

use autopost_core::task::Task;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Unbounded FIFO queue shared between the seeder, the reschedulers, and the
/// worker pool.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<(String, Task)>,
    rx: Mutex<mpsc::UnboundedReceiver<(String, Task)>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue a task snapshot. Never blocks.
    pub fn enqueue(&self, task: &Task) {
        tracing::debug!("enqueue task {} -> {}", task.id, task.destination);
        // The receiver lives as long as self, so this cannot fail.
        let _ = self.tx.send((task.id.clone(), task.clone()));
    }

    /// Wait for the next item. `None` only after the queue is closed.
    pub async fn dequeue(&self) -> Option<(String, Task)> {
        self.rx.lock().await.recv().await
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids with an execution currently in flight, from admission at dequeue to
/// the reschedule decision.
///
/// This is what makes "at most one execution per id" hold even when a second
/// snapshot of the same task reaches the queue — a stray duplicate enqueue,
/// or a health sweep firing while the execution sits in a long flood wait.
#[derive(Default)]
pub struct InFlight {
    ids: std::sync::Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id for execution. `false` means another execution already
    /// owns it and the caller must drop its snapshot.
    pub fn claim(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }

    /// Hand the id back once the execution has finished its cycle.
    pub fn release(&self, id: &str) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}
