//! Caller-facing handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use gantry_core::{Job, JobSpec, JobStatus};
use gantry_store::{reconcile, JobStore, StoreError};

use crate::condition::ConditionSource;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::executor::Executor;
use crate::scheduler::{Scheduler, Trigger};

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

/// How often a caller-side compare-and-swap (cancel) is retried after
/// losing a benign race before giving up.
const CAS_RETRIES: u32 = 3;

/// The scheduler handle.
///
/// Constructed once and passed to callers explicitly; there is no
/// ambient global instance. Startup reconciliation runs before the
/// dispatch loop accepts any trigger.
pub struct Gantry {
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    shutdown_tx: broadcast::Sender<()>,
    config: SchedulerConfig,
}

impl Gantry {
    /// Reconcile the store, then start the dispatch loop and the
    /// condition-change forwarder.
    pub async fn start(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        condition: Arc<dyn ConditionSource>,
    ) -> Result<Self, SchedulerError> {
        reconcile(store.as_ref()).await?;

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            store.clone(),
            executor,
            condition.clone(),
            trigger_tx.clone(),
        ));
        tokio::spawn(
            scheduler
                .clone()
                .run(trigger_rx, shutdown_tx.subscribe()),
        );

        let mut changes = condition.subscribe();
        let forward_tx = trigger_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let _ = forward_tx.send(Trigger::ConditionChanged);
                    }
                }
            }
        });

        Ok(Self {
            store,
            scheduler,
            trigger_tx,
            shutdown_tx,
            config,
        })
    }

    /// Submit a job with the given prerequisites. The job and its edges
    /// persist atomically; the new ID is returned.
    pub async fn submit(
        &self,
        spec: JobSpec,
        prerequisites: &[Uuid],
    ) -> Result<Uuid, SchedulerError> {
        if self.trigger_tx.is_closed() {
            return Err(SchedulerError::ShuttingDown);
        }
        let job = Job::new(spec);
        let id = job.id;
        self.store.insert(&job, prerequisites).await?;
        debug!("submitted job {id}");
        let _ = self.trigger_tx.send(Trigger::JobEnqueued);
        Ok(id)
    }

    /// Submit a chain: each job depends on the previous one. Sugar over
    /// pairwise edge insertion.
    pub async fn submit_chain(&self, specs: Vec<JobSpec>) -> Result<Vec<Uuid>, SchedulerError> {
        if self.trigger_tx.is_closed() {
            return Err(SchedulerError::ShuttingDown);
        }
        let mut ids: Vec<Uuid> = Vec::with_capacity(specs.len());
        for spec in specs {
            let prerequisites: Vec<Uuid> = ids.last().copied().into_iter().collect();
            let job = Job::new(spec);
            self.store.insert(&job, &prerequisites).await?;
            ids.push(job.id);
        }
        debug!("submitted chain of {} jobs", ids.len());
        let _ = self.trigger_tx.send(Trigger::JobEnqueued);
        Ok(ids)
    }

    /// Cancel a job. Idempotent on an already-cancelled job; cancelling
    /// a succeeded or failed job is an illegal transition. A running
    /// attempt is signalled cooperatively; the status flips without
    /// waiting for the executor.
    pub async fn cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut last_race: Option<StoreError> = None;
        for _ in 0..CAS_RETRIES {
            let mut job = self.store.get(id).await?;
            let previous = job.status;
            if !job.cancel(Utc::now())? {
                return Ok(());
            }
            match self.store.update(&job, previous).await {
                Ok(()) => {
                    if previous == JobStatus::Running {
                        self.scheduler.cancel_inflight(id).await;
                    }
                    info!("cancelled job {id}");
                    return Ok(());
                }
                // Lost to a dispatcher or completion; re-read and retry.
                Err(e @ StoreError::StaleState { .. }) => last_race = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_race.unwrap_or(StoreError::Unavailable).into())
    }

    /// Current snapshot of a job.
    pub async fn query(&self, id: Uuid) -> Result<Job, SchedulerError> {
        Ok(self.store.get(id).await?)
    }

    /// Jobs carrying the given tag.
    pub async fn query_by_tag(&self, tag: &str) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_by_tag(tag).await?)
    }

    /// Jobs in the given status.
    pub async fn query_by_status(&self, status: JobStatus) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_by_status(status).await?)
    }

    /// Whether the job has any prerequisites.
    pub async fn has_dependencies(&self, id: Uuid) -> Result<bool, SchedulerError> {
        Ok(self.store.has_dependencies(id).await?)
    }

    /// Remove terminal jobs older than the retention window. With no
    /// explicit retention the configured default applies.
    pub async fn prune(&self, retention: Option<Duration>) -> Result<u64, SchedulerError> {
        let retention = retention.unwrap_or(self.config.prune_retention);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(self.store.prune(cutoff).await?)
    }

    /// Stop the dispatch loop. In-flight attempts finish on their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
