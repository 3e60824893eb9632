//! # Autopost Engine
//!
//! The recurring-task dispatch engine: a durable task store feeds a FIFO
//! dispatch queue drained by a fixed worker pool, with a counting semaphore
//! bounding concurrent sends, a pure retry/backoff policy classifying every
//! outcome, and an independent health monitor reviving tasks whose loop died
//! silently.
//!
//! ```text
//! TaskStore ──(seed, staggered)──► DispatchQueue ──► WorkerPool (admission)
//!                                        ▲               │ spawn per task
//!                                        │               ▼
//!                                        │        Execution: sleep(interval±jitter)
//!                                        │               │ Sender::send (limiter slot)
//!                                        │               ▼
//!                                  Rescheduler ◄── Retry/Backoff Policy
//!
//! HealthMonitor ── every hour: force-requeue tasks quiet for 3×interval
//!                  (skipping ids with an execution in flight)
//! ```
//!
//! Delivery is at-least-once: duplicate suppression holds within one process
//! lifetime, and a crash loses at most the in-flight attempt.

pub mod control;
pub mod health;
pub mod policy;
pub mod queue;
pub mod reschedule;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use autopost_core::config::EngineConfig;
use autopost_core::error::Result;
use autopost_core::traits::{NotifySink, Sender};
use autopost_store::TaskStore;
use tokio::sync::Semaphore;

pub use control::EngineHandle;
pub use health::HealthMonitor;
pub use policy::{Decision, decide};
pub use queue::{DispatchQueue, InFlight};
pub use reschedule::{Rescheduler, effective_interval};

use worker::EngineCtx;

/// The assembled engine. Construct, optionally grab a handle, then `start()`.
pub struct DispatchEngine {
    ctx: Arc<EngineCtx>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<TaskStore>,
        sender: Arc<dyn Sender>,
        sink: Option<Arc<dyn NotifySink>>,
        cfg: EngineConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(cfg.max_concurrent_sends));
        Self {
            ctx: Arc::new(EngineCtx {
                store,
                queue: Arc::new(DispatchQueue::new()),
                sender,
                sink,
                limiter,
                in_flight: Arc::new(InFlight::new()),
                cfg,
            }),
        }
    }

    /// Control handle for the operator layer.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.ctx.clone())
    }

    /// Spawn the worker pool and the health monitor, then seed the queue
    /// with every active task — staggered, so a restart with many tasks does
    /// not fire them all in the same instant.
    pub async fn start(&self) -> Result<()> {
        let ctx = &self.ctx;
        tracing::info!(
            "engine starting: {} workers, {} concurrent sends max, sender '{}'",
            ctx.cfg.workers,
            ctx.cfg.max_concurrent_sends,
            ctx.sender.name()
        );

        for worker_id in 0..ctx.cfg.workers {
            tokio::spawn(worker::run_worker(ctx.clone(), worker_id));
        }

        let monitor = HealthMonitor::new(
            ctx.store.clone(),
            ctx.queue.clone(),
            ctx.in_flight.clone(),
            ctx.cfg.clone(),
        );
        tokio::spawn(monitor.run());

        let tasks = ctx.store.load()?;
        let active: Vec<_> = tasks.into_iter().filter(|t| t.active).collect();
        tracing::info!("seeding {} active task(s)", active.len());
        let stagger = Duration::from_millis(ctx.cfg.startup_stagger_ms);
        for task in &active {
            ctx.queue.enqueue(task);
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
        }
        Ok(())
    }
}
