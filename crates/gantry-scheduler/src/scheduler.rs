//! Trigger-driven readiness scan and dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_core::{FailureOutcome, Job, JobStatus};
use gantry_store::{JobStore, StoreError};

use crate::condition::ConditionSource;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::executor::{ExecutionOutcome, Executor};

/// Why a readiness scan was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A new job was enqueued.
    JobEnqueued,
    /// An attempt completed (success or failure).
    JobCompleted,
    /// A system condition snapshot changed.
    ConditionChanged,
}

/// The readiness loop.
///
/// Consumes triggers from a channel plus a periodic tick, re-scans
/// enqueued jobs on each, and dispatches every currently runnable one.
/// Dispatch performs the `Enqueued -> Running` compare-and-swap before
/// invoking the executor, so racing triggers cannot double-dispatch a
/// job: the loser's swap fails and it skips.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    condition: Arc<dyn ConditionSource>,
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    inflight: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl Scheduler {
    /// Create a scheduler. Returns the handle and the trigger sender
    /// callers use to wake the loop.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        condition: Arc<dyn ConditionSource>,
        trigger_tx: mpsc::UnboundedSender<Trigger>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            condition,
            trigger_tx,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run until shutdown, scanning on every trigger and on a periodic
    /// tick.
    pub async fn run(
        self: Arc<Self>,
        mut trigger_rx: mpsc::UnboundedReceiver<Trigger>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            "scheduler running (tick every {:?})",
            self.config.tick_interval
        );
        let mut tick = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.clone().scan("tick").await;
                }
                trigger = trigger_rx.recv() => match trigger {
                    Some(trigger) => self.clone().scan(trigger_name(trigger)).await,
                    None => break,
                },
            }
        }
    }

    /// Signal the cancel token of an in-flight attempt, if any.
    pub async fn cancel_inflight(&self, id: Uuid) -> bool {
        match self.inflight.lock().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn scan(self: Arc<Self>, reason: &'static str) {
        match self.dispatch_runnable().await {
            Ok(0) => {}
            Ok(dispatched) => debug!("scan ({reason}) dispatched {dispatched} jobs"),
            // A failed scan must not take the process down; the next
            // trigger retries.
            Err(e) => warn!("scan ({reason}) failed: {e}"),
        }
    }

    async fn dispatch_runnable(self: Arc<Self>) -> Result<usize, SchedulerError> {
        let snapshot = self.condition.current();
        let now = Utc::now();
        // FIFO by enqueue time; the store returns them ordered.
        let candidates = self.store.list_by_status(JobStatus::Enqueued).await?;

        let mut dispatched = 0;
        for job in candidates {
            if !job.ready(&snapshot, now) {
                continue;
            }
            if self.store.has_unsatisfied_prerequisites(job.id).await? {
                continue;
            }
            if self.clone().dispatch(job).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Claim the job via compare-and-swap and hand it to the executor.
    /// Returns false when another trigger won the race.
    async fn dispatch(self: Arc<Self>, mut job: Job) -> Result<bool, SchedulerError> {
        job.begin_attempt(Utc::now())?;
        match self.store.update(&job, JobStatus::Enqueued).await {
            Ok(()) => {}
            Err(StoreError::StaleState { .. }) => {
                debug!("lost dispatch race for job {}", job.id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let token = CancellationToken::new();
        self.inflight.lock().await.insert(job.id, token.clone());
        info!(
            "dispatching job {} (attempt {})",
            job.id, job.run_attempt_count
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_attempt(job, token).await;
        });
        Ok(true)
    }

    async fn run_attempt(self: Arc<Self>, mut job: Job, token: CancellationToken) {
        // The executor runs in its own task so a panic inside it becomes
        // a failed attempt instead of a poisoned scheduler.
        let executor = self.executor.clone();
        let attempt_job = job.clone();
        let attempt_token = token.clone();
        let joined = tokio::spawn(async move {
            executor.execute(&attempt_job, attempt_token).await
        })
        .await;
        // The attempt is over either way; its token must not linger.
        self.inflight.lock().await.remove(&job.id);
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!("executor panicked on job {}", job.id);
                ExecutionOutcome::Failed("executor panicked".to_string())
            }
            // Runtime shutting down; leave the job for reconciliation.
            Err(_) => return,
        };

        let now = Utc::now();
        let applied = match outcome {
            ExecutionOutcome::Succeeded => {
                info!("job {} succeeded", job.id);
                job.complete(now).map(|_| ())
            }
            ExecutionOutcome::Failed(message) => job.fail(message, now).map(|outcome| {
                match outcome {
                    FailureOutcome::Retrying(delay) => {
                        warn!("job {} failed; retrying in {delay:?}", job.id)
                    }
                    FailureOutcome::Exhausted => warn!("job {} failed permanently", job.id),
                    FailureOutcome::NextPeriod => {
                        warn!("job {} failed; re-armed for its next period", job.id)
                    }
                }
            }),
        };
        if let Err(e) = applied {
            error!("completion of job {} rejected: {e}", job.id);
            return;
        }

        match self.store.update(&job, JobStatus::Running).await {
            Ok(()) => {}
            // Cancelled while the attempt was in flight; its outcome no
            // longer matters.
            Err(StoreError::StaleState { actual, .. }) => {
                debug!("job {} moved to {actual:?} mid-attempt", job.id);
                return;
            }
            Err(e) => {
                error!("failed to persist outcome of job {}: {e}", job.id);
                return;
            }
        }
        let _ = self.trigger_tx.send(Trigger::JobCompleted);
    }
}

fn trigger_name(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::JobEnqueued => "enqueued",
        Trigger::JobCompleted => "completed",
        Trigger::ConditionChanged => "condition",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::StaticConditionSource;
    use async_trait::async_trait;
    use gantry_core::JobSpec;
    use gantry_store::MemoryJobStore;

    struct SucceedingExecutor;

    #[async_trait]
    impl Executor for SucceedingExecutor {
        async fn execute(&self, _job: &Job, _cancel: CancellationToken) -> ExecutionOutcome {
            ExecutionOutcome::Succeeded
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl Executor for PanickingExecutor {
        async fn execute(&self, _job: &Job, _cancel: CancellationToken) -> ExecutionOutcome {
            panic!("scripted panic");
        }
    }

    fn scheduler_with(
        executor: Arc<dyn Executor>,
    ) -> (Arc<Scheduler>, Arc<MemoryJobStore>, mpsc::UnboundedReceiver<Trigger>) {
        let store = Arc::new(MemoryJobStore::new());
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            executor,
            Arc::new(StaticConditionSource::permissive()),
            trigger_tx,
        ));
        (scheduler, store, trigger_rx)
    }

    async fn running_job(store: &MemoryJobStore) -> Job {
        let mut job = Job::new(JobSpec::new().with_max_retries(0));
        store.insert(&job, &[]).await.unwrap();
        job.begin_attempt(Utc::now()).unwrap();
        store.update(&job, JobStatus::Enqueued).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_run_attempt_clears_inflight_token() {
        let executors: [Arc<dyn Executor>; 2] =
            [Arc::new(SucceedingExecutor), Arc::new(PanickingExecutor)];
        for executor in executors {
            let (scheduler, store, _trigger_rx) = scheduler_with(executor);
            let job = running_job(&store).await;

            let token = CancellationToken::new();
            scheduler
                .inflight
                .lock()
                .await
                .insert(job.id, token.clone());
            scheduler.clone().run_attempt(job.clone(), token).await;

            // The attempt settled, so there is nothing left to cancel.
            assert!(!scheduler.cancel_inflight(job.id).await);
            assert!(store.get(job.id).await.unwrap().status.is_terminal());
        }
    }
}
