//! Boundary traits between the engine and the surrounding system.

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{Destination, Payload, SendOutcome, Task};

/// Performs one delivery attempt and classifies the result.
///
/// Implementations wrap whatever transport delivers the payload; the engine
/// only ever sees the classified `SendOutcome`.
#[async_trait]
pub trait Sender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, destination: &Destination, payload: &Payload) -> SendOutcome;
}

/// Fire-and-forget callback into the surrounding layer.
///
/// A sink failure must never affect the task's own scheduling — implementors
/// log and swallow their own errors.
#[async_trait]
pub trait NotifySink: Send + Sync {
    /// `next_attempt_in` is `None` when the task was parked and will not
    /// run again without operator action.
    async fn notify(&self, task: &Task, outcome: &SendOutcome, next_attempt_in: Option<Duration>);
}
