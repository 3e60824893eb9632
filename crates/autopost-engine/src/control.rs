//! Operator control surface.
//!
//! These are the entry points the surrounding layer (CLI, bot menu, API)
//! calls. Each one leaves the store and the dispatch queue in a consistent
//! state: resume enqueues immediately instead of waiting for the next health
//! sweep, delete relies on the dequeue-time store check to drop any queued
//! snapshot.

use std::sync::Arc;

use autopost_core::error::Result;
use autopost_core::task::{Task, TaskDefinition};

use crate::worker::EngineCtx;

/// Cloneable handle for controlling a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    ctx: Arc<EngineCtx>,
}

impl EngineHandle {
    pub(crate) fn new(ctx: Arc<EngineCtx>) -> Self {
        Self { ctx }
    }

    /// Create a task and, when active, enqueue it immediately.
    /// The interval is clamped into the configured band first.
    pub fn create_task(&self, mut definition: TaskDefinition) -> Result<String> {
        definition.interval_secs = self.ctx.cfg.clamp_interval(definition.interval_secs);
        let task = Task::new(definition);
        self.ctx.store.upsert(&task)?;
        tracing::info!(
            "task {} created: {} every {}s",
            task.id,
            task.destination,
            task.interval_secs
        );
        if task.active {
            self.ctx.queue.enqueue(&task);
        }
        Ok(task.id)
    }

    /// Stop a task. Cooperative: a mid-sleep execution still completes its
    /// current send, then the task is dropped at the pre-reschedule check.
    pub fn pause(&self, id: &str) -> Result<()> {
        self.ctx.store.set_active(id, false)?;
        tracing::info!("task {id} paused");
        Ok(())
    }

    /// Reactivate a task and enqueue it right away.
    pub fn resume(&self, id: &str) -> Result<()> {
        let task = self.ctx.store.get(id)?;
        if task.active {
            // Already scheduled; enqueueing again would double it up.
            tracing::debug!("task {id} already active, resume is a no-op");
            return Ok(());
        }
        self.ctx.store.set_active(id, true)?;
        self.ctx.store.touch_activity(id)?;
        let task = self.ctx.store.get(id)?;
        self.ctx.queue.enqueue(&task);
        tracing::info!("task {id} resumed");
        Ok(())
    }

    /// Remove a task permanently, including its attached file. Any queued
    /// snapshot is dropped at dequeue when the store lookup comes back empty.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.ctx.store.delete(id)?;
        tracing::info!("task {id} deleted");
        Ok(())
    }

    /// Change a task's interval (clamped). Takes effect on the next cycle,
    /// because workers re-read the store at dequeue and at reschedule.
    pub fn set_interval(&self, id: &str, interval_secs: u64) -> Result<()> {
        let clamped = self.ctx.cfg.clamp_interval(interval_secs);
        if clamped != interval_secs {
            tracing::warn!(
                "interval {interval_secs}s outside [{}, {}], clamped to {clamped}s",
                self.ctx.cfg.min_interval_secs,
                self.ctx.cfg.max_interval_secs
            );
        }
        self.ctx.store.set_interval(id, clamped)?;
        tracing::info!("task {id} interval set to {clamped}s");
        Ok(())
    }

    /// Fetch one task for display.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.ctx.store.get(id)
    }

    /// All tasks, for status displays.
    pub fn list(&self) -> Result<Vec<Task>> {
        self.ctx.store.load()
    }
}
