//! Worker pool — admission control in front of spawned executions.
//!
//! Workers drain the dispatch queue, validate each snapshot against the
//! store, claim the task id, and spawn the actual execution cycle as its own
//! tokio task. The interval sleep therefore never occupies a pool slot, so
//! every task keeps its own cadence no matter how many tasks share the
//! engine. Concurrency is bounded by the shared counting semaphore around the
//! sends themselves, which is what keeps the bot under the external API's
//! abuse protection — interval and retry sleeps happen outside the permit.

use std::sync::Arc;
use std::time::Duration;

use autopost_core::config::EngineConfig;
use autopost_core::error::{AutopostError, Result};
use autopost_core::task::{SendOutcome, Task};
use autopost_core::traits::{NotifySink, Sender};
use autopost_store::TaskStore;
use tokio::sync::Semaphore;

use crate::policy::{self, Decision};
use crate::queue::{DispatchQueue, InFlight};
use crate::reschedule::{self, Rescheduler};

/// Everything a worker needs, shared across the pool.
pub(crate) struct EngineCtx {
    pub store: Arc<TaskStore>,
    pub queue: Arc<DispatchQueue>,
    pub sender: Arc<dyn Sender>,
    pub sink: Option<Arc<dyn NotifySink>>,
    pub limiter: Arc<Semaphore>,
    pub in_flight: Arc<InFlight>,
    pub cfg: EngineConfig,
}

/// One worker: dequeue, admit, hand off — forever.
pub(crate) async fn run_worker(ctx: Arc<EngineCtx>, worker_id: usize) {
    tracing::debug!("worker {worker_id} started");
    while let Some((id, snapshot)) = ctx.queue.dequeue().await {
        if let Some(task) = admit(&ctx, &id, snapshot).await {
            tokio::spawn(execute(ctx.clone(), task));
        }
    }
    tracing::debug!("worker {worker_id} stopped (queue closed)");
}

/// Refresh the queued snapshot against the store and claim the id.
/// `None` drops the snapshot: the task is gone, paused, or an execution for
/// it is already in flight.
async fn admit(ctx: &Arc<EngineCtx>, id: &str, snapshot: Task) -> Option<Task> {
    // The queued snapshot may be stale (interval edits, pause, delete). A
    // deleted task is dropped here — this is how delete() clears the queue
    // without touching it.
    let task = match ctx.store.get(id) {
        Ok(task) => task,
        Err(AutopostError::NotFound(_)) => {
            tracing::debug!("task {id} no longer exists, dropping queued snapshot");
            return None;
        }
        Err(e) => {
            tracing::warn!("store read failed for task {id}, using queued snapshot: {e}");
            snapshot
        }
    };
    if !task.active {
        tracing::debug!("task {} inactive, dropped at dequeue", task.id);
        return None;
    }
    if !ctx.in_flight.claim(id) {
        tracing::debug!("task {id} already executing, dropping duplicate snapshot");
        return None;
    }

    persist_with_retry(ctx, || ctx.store.touch_activity(id)).await;
    Some(task)
}

/// One full execution cycle: pace, send, persist, notify, reschedule.
/// Runs as its own spawned task; the in-flight claim is released at the end,
/// right before the reschedule decision.
async fn execute(ctx: Arc<EngineCtx>, task: Task) {
    let id = task.id.clone();

    // Pace this task's next send. The wait happens before acquiring a
    // limiter permit, so a sleeping task never starves concurrent sends.
    let wait = reschedule::effective_interval(
        task.interval_secs,
        task.jitter_secs,
        ctx.cfg.min_interval_secs,
    );
    tracing::info!(
        "task {}: sending to {} in {}s",
        task.id,
        task.destination,
        wait.as_secs()
    );
    tokio::time::sleep(wait).await;

    let outcome = attempt_send(&ctx, &task).await;
    let success = outcome.is_success();
    let error_text = outcome.error_text();

    if success {
        tracing::info!("task {}: delivered to {}", task.id, task.destination);
    } else {
        tracing::warn!(
            "task {}: delivery to {} failed: {}",
            task.id,
            task.destination,
            error_text.as_deref().unwrap_or("unknown")
        );
    }

    // Persist before anything downstream treats the new state as
    // authoritative. A crash from here on loses at most this attempt.
    persist_with_retry(&ctx, || {
        ctx.store.record_outcome(&id, success, error_text.as_deref())
    })
    .await;

    let parked = matches!(outcome, SendOutcome::Fatal { .. });
    if parked {
        persist_with_retry(&ctx, || ctx.store.set_active(&id, false)).await;
        tracing::error!(
            "task {}: parked after fatal error ({}); resume manually once fixed",
            task.id,
            error_text.as_deref().unwrap_or("unknown")
        );
    }

    // Fire-and-forget notification; a sink failure never touches scheduling.
    if let Some(sink) = &ctx.sink {
        let sink = sink.clone();
        let task = task.clone();
        let outcome = outcome.clone();
        let next_attempt_in = if parked {
            None
        } else {
            Some(Duration::from_secs(task.interval_secs))
        };
        tokio::spawn(async move {
            sink.notify(&task, &outcome, next_attempt_in).await;
        });
    }

    ctx.in_flight.release(&id);
    if !parked {
        let rescheduler = Rescheduler::new(ctx.store.clone(), ctx.queue.clone());
        rescheduler.requeue_if_active(&id);
    }
}

/// Run the send through the retry policy until it produces a final outcome.
///
/// Flood/slow-mode waits retry the same attempt without advancing the
/// transient budget; transient failures retry in place up to the configured
/// bound, then fall through as a failed cycle.
async fn attempt_send(ctx: &Arc<EngineCtx>, task: &Task) -> SendOutcome {
    let mut attempt = 0u32;
    loop {
        let outcome = {
            let Ok(_permit) = ctx.limiter.acquire().await else {
                // Limiter closed means the engine is shutting down.
                return SendOutcome::Transient {
                    reason: "concurrency limiter closed".into(),
                };
            };
            ctx.sender.send(&task.destination, &task.payload).await
        };

        match policy::decide(attempt, &outcome, &ctx.cfg.retry) {
            Decision::Reschedule { .. } | Decision::Park => return outcome,
            Decision::RetryAfter {
                delay,
                advance_attempt,
            } => {
                if advance_attempt {
                    attempt += 1;
                }
                tracing::warn!(
                    "task {}: {} — retrying in {}s",
                    task.id,
                    outcome.error_text().unwrap_or_default(),
                    delay.as_secs()
                );
                // Keep the health monitor off our back during long waits.
                persist_with_retry(ctx, || ctx.store.touch_activity(&task.id)).await;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry a store write with doubling backoff. Losing a state update is worse
/// than a delayed one, so this only gives up after the configured budget.
pub(crate) async fn persist_with_retry<F>(ctx: &Arc<EngineCtx>, mut op: F)
where
    F: FnMut() -> Result<()>,
{
    let mut delay = Duration::from_millis(ctx.cfg.retry.store_retry_delay_ms);
    for attempt in 1..=ctx.cfg.retry.store_write_retries {
        match op() {
            Ok(()) => return,
            // The task was deleted mid-flight; nothing left to persist.
            Err(AutopostError::NotFound(_)) => return,
            Err(e) => {
                tracing::warn!("store write failed (attempt {attempt}): {e}");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
    tracing::error!(
        "store write dropped after {} attempts",
        ctx.cfg.retry.store_write_retries
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DispatchEngine;
    use crate::HealthMonitor;
    use async_trait::async_trait;
    use autopost_core::config::EngineConfig;
    use autopost_core::task::{Destination, Payload, TaskDefinition};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Sender that plays back scripted outcomes, then succeeds forever.
    struct ScriptedSender {
        script: Mutex<VecDeque<SendOutcome>>,
        calls: AtomicU32,
    }

    impl ScriptedSender {
        fn new(script: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn always_ok() -> Arc<Self> {
            Self::new(Vec::new())
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _destination: &Destination, _payload: &Payload) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SendOutcome::Success)
        }
    }

    /// Sink that forwards every notification to the test.
    struct ChannelSink {
        tx: mpsc::UnboundedSender<(String, SendOutcome, Option<Duration>)>,
    }

    #[async_trait]
    impl NotifySink for ChannelSink {
        async fn notify(
            &self,
            task: &Task,
            outcome: &SendOutcome,
            next_attempt_in: Option<Duration>,
        ) {
            let _ = self.tx.send((task.id.clone(), outcome.clone(), next_attempt_in));
        }
    }

    fn test_cfg() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.workers = 2;
        cfg.min_interval_secs = 0;
        cfg.startup_stagger_ms = 0;
        cfg.retry.transient_delay_secs = 1;
        cfg
    }

    fn definition(interval: u64) -> TaskDefinition {
        TaskDefinition::new(Destination::chat("@group"), Payload::text("hi"), interval)
    }

    struct Harness {
        store: Arc<TaskStore>,
        engine: DispatchEngine,
        sender: Arc<ScriptedSender>,
        sink_rx: mpsc::UnboundedReceiver<(String, SendOutcome, Option<Duration>)>,
    }

    fn harness(cfg: EngineConfig, sender: Arc<ScriptedSender>) -> Harness {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let (tx, sink_rx) = mpsc::unbounded_channel();
        let engine = DispatchEngine::new(
            store.clone(),
            sender.clone(),
            Some(Arc::new(ChannelSink { tx })),
            cfg,
        );
        Harness {
            store,
            engine,
            sender,
            sink_rx,
        }
    }

    // Scenario: interval 30, jitter 0, sender always succeeds.
    // Over 150 seconds the task runs 5 times (±1 for boundary skew).
    #[tokio::test(start_paused = true)]
    async fn test_steady_cadence() {
        let h = harness(test_cfg(), ScriptedSender::always_ok());
        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(30)).unwrap();

        tokio::time::sleep(Duration::from_secs(150)).await;

        let task = h.store.get(&id).unwrap();
        assert!(
            (4..=6).contains(&task.sent_count),
            "expected ~5 sends, got {}",
            task.sent_count
        );
        assert_eq!(task.failed_count, 0);
        assert_eq!(task.consecutive_failures, 0);
    }

    // Tasks outnumbering the pool must each keep their own cadence: the
    // interval sleep runs in a spawned execution, not on a worker, so two
    // workers drive four 30-second tasks at 30-second periods each.
    #[tokio::test(start_paused = true)]
    async fn test_cadence_independent_of_pool_size() {
        let h = harness(test_cfg(), ScriptedSender::always_ok());
        h.engine.start().await.unwrap();
        let ids: Vec<String> = (0..4)
            .map(|_| h.engine.handle().create_task(definition(30)).unwrap())
            .collect();

        tokio::time::sleep(Duration::from_secs(150)).await;

        for id in &ids {
            let task = h.store.get(id).unwrap();
            assert!(
                (4..=6).contains(&task.sent_count),
                "task {id}: expected ~5 sends in 150s at interval 30, got {}",
                task.sent_count
            );
            assert_eq!(task.failed_count, 0);
        }
    }

    // Scenario: RateLimited(10) on the first call, success after. One retry
    // after a 10s pause, then normal scheduling; failures never counted.
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retry_then_success() {
        let mut cfg = test_cfg();
        cfg.workers = 1;
        let sender = ScriptedSender::new(vec![SendOutcome::RateLimited {
            retry_after_secs: 10,
        }]);
        let mut h = harness(cfg, sender);
        let started = tokio::time::Instant::now();

        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(5)).unwrap();

        let (event_id, outcome, _) = h.sink_rx.recv().await.unwrap();
        assert_eq!(event_id, id);
        assert_eq!(outcome, SendOutcome::Success);
        // First attempt at t=5, flood wait 10s, retry lands at t=15.
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(h.sender.calls(), 2);

        let task = h.store.get(&id).unwrap();
        assert_eq!(task.consecutive_failures, 0);
        assert_eq!(task.sent_count, 1);
        assert_eq!(task.failed_count, 0);
    }

    // Scenario: sender always returns Fatal. One attempt, the task is
    // parked, one notification, no further enqueues.
    #[tokio::test(start_paused = true)]
    async fn test_fatal_parks_task() {
        let mut cfg = test_cfg();
        cfg.workers = 1;
        let sender = ScriptedSender::new(vec![
            SendOutcome::Fatal {
                reason: "unauthorized".into(),
            };
            5
        ]);
        let mut h = harness(cfg, sender);

        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(5)).unwrap();

        let (event_id, outcome, next_attempt_in) = h.sink_rx.recv().await.unwrap();
        assert_eq!(event_id, id);
        assert!(matches!(outcome, SendOutcome::Fatal { .. }));
        assert!(next_attempt_in.is_none());

        // Give the engine plenty of (virtual) time to misbehave.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.sender.calls(), 1);
        assert!(h.sink_rx.try_recv().is_err());

        let task = h.store.get(&id).unwrap();
        assert!(!task.active);
        assert_eq!(task.failed_count, 1);
        assert_eq!(task.consecutive_failures, 1);
    }

    // Scenario: delete() mid-sleep. The in-flight send still completes, but
    // the task is never re-enqueued and is gone from the store.
    #[tokio::test(start_paused = true)]
    async fn test_delete_while_sleeping() {
        let mut cfg = test_cfg();
        cfg.workers = 1;
        let h = harness(cfg, ScriptedSender::always_ok());

        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(30)).unwrap();

        // Execution starts at t=0 and sleeps until t=30; delete at t=10.
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.engine.handle().delete(&id).unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.sender.calls(), 1, "in-flight send should complete");
        assert!(matches!(
            h.store.get(&id),
            Err(AutopostError::NotFound(_))
        ));
    }

    // Deactivation while enqueued-but-not-dequeued: dropped at admission,
    // never sent, never re-enqueued.
    #[tokio::test(start_paused = true)]
    async fn test_paused_task_dropped_at_dequeue() {
        let cfg = test_cfg();
        let h = harness(cfg, ScriptedSender::always_ok());

        h.engine.start().await.unwrap();
        // No await between create and pause: the queued copy is still
        // sitting in the queue when the flag flips.
        let id = h.engine.handle().create_task(definition(5)).unwrap();
        h.engine.handle().pause(&id).unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.sender.calls(), 0);
        let task = h.store.get(&id).unwrap();
        assert!(!task.active);
        assert_eq!(task.sent_count, 0);
    }

    // A stray second snapshot of the same task in the queue is dropped at
    // admission while the first execution holds the id, so the task keeps
    // one cadence instead of doubling it.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_snapshot_dropped_while_in_flight() {
        let h = harness(test_cfg(), ScriptedSender::always_ok());
        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(30)).unwrap();
        let task = h.store.get(&id).unwrap();
        h.engine.ctx.queue.enqueue(&task);

        tokio::time::sleep(Duration::from_secs(150)).await;

        let task = h.store.get(&id).unwrap();
        assert!(
            (4..=6).contains(&task.sent_count),
            "duplicate snapshot must not double the cadence, got {} sends",
            task.sent_count
        );
    }

    // A health sweep during a long flood wait must not start a second
    // execution: the id is in flight and the sweep skips it.
    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_task_mid_flood_wait() {
        let mut cfg = test_cfg();
        cfg.workers = 1;
        let sender = ScriptedSender::new(vec![SendOutcome::RateLimited {
            retry_after_secs: 600,
        }]);
        let h = harness(cfg, sender);

        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(30)).unwrap();

        // First send at t=30 hits the flood wait and sleeps until t=630.
        // By t=200 the task has been quiet for well over 3x its interval.
        tokio::time::sleep(Duration::from_secs(200)).await;
        let ctx = &h.engine.ctx;
        let monitor = HealthMonitor::new(
            ctx.store.clone(),
            ctx.queue.clone(),
            ctx.in_flight.clone(),
            ctx.cfg.clone(),
        );
        assert_eq!(monitor.sweep(), 0, "mid-flood-wait task must not be revived");
        assert_eq!(h.sender.calls(), 1);

        // The retry lands at t=630 and succeeds.
        tokio::time::sleep(Duration::from_secs(440)).await;
        let task = h.store.get(&id).unwrap();
        assert_eq!(task.consecutive_failures, 0);
        assert!(task.sent_count >= 1);
    }

    // Transient failures burn the in-place retry budget, then the cycle is
    // recorded as failed and the task keeps its normal schedule.
    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_budget_then_reschedules() {
        let mut cfg = test_cfg();
        cfg.workers = 1;
        let transient = SendOutcome::Transient {
            reason: "timeout".into(),
        };
        let sender = ScriptedSender::new(vec![transient; 4]);
        let mut h = harness(cfg, sender);

        h.engine.start().await.unwrap();
        let id = h.engine.handle().create_task(definition(5)).unwrap();

        let (_, outcome, next_attempt_in) = h.sink_rx.recv().await.unwrap();
        assert!(matches!(outcome, SendOutcome::Transient { .. }));
        assert!(next_attempt_in.is_some());
        // 1 initial + 3 in-place retries
        assert_eq!(h.sender.calls(), 4);

        let task = h.store.get(&id).unwrap();
        assert_eq!(task.failed_count, 1);
        assert_eq!(task.consecutive_failures, 1);
        assert!(task.active);

        // Next cycle succeeds and resets the streak.
        let (_, outcome, _) = h.sink_rx.recv().await.unwrap();
        assert_eq!(outcome, SendOutcome::Success);
        let task = h.store.get(&id).unwrap();
        assert_eq!(task.sent_count, 1);
        assert_eq!(task.consecutive_failures, 0);
    }
}
