//! Startup reconciliation.
//!
//! A job persisted as `Running` cannot have survived a process restart:
//! no executor instance is alive when the store is opened. Such rows are
//! evidence of an unclean shutdown and are reset to `Enqueued` so the
//! attempt is neither lost nor double-counted. This is the only status
//! mutation outside the state machine, and it must run before the
//! scheduler accepts any trigger.

use tracing::{info, warn};

use chrono::Utc;
use gantry_core::JobStatus;

use crate::error::StoreError;
use crate::store::JobStore;

/// Reset jobs left `Running` by an unclean shutdown back to `Enqueued`.
///
/// The run attempt count is preserved: the interrupted attempt was
/// dispatched and still counts. Returns how many jobs were reset.
pub async fn reconcile(store: &dyn JobStore) -> Result<usize, StoreError> {
    let orphaned = store.list_by_status(JobStatus::Running).await?;
    let mut reset = 0;

    for mut job in orphaned {
        warn!(
            "job {} recorded running with no active attempt; re-enqueueing",
            job.id
        );
        job.status = JobStatus::Enqueued;
        job.next_eligible_at = None;
        job.updated_at = Utc::now();
        match store.update(&job, JobStatus::Running).await {
            Ok(()) => reset += 1,
            // Someone else repaired it first; nothing to do.
            Err(StoreError::StaleState { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    if reset > 0 {
        info!("startup reconciliation re-enqueued {reset} jobs");
    }
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use gantry_core::{Job, JobSpec};

    #[tokio::test]
    async fn test_reconcile_resets_running_jobs() {
        let store = MemoryJobStore::new();

        // Simulate a crash: a dispatched job persisted as running.
        let mut crashed = Job::new(JobSpec::new());
        crashed.begin_attempt(Utc::now()).unwrap();
        store.insert(&crashed, &[]).await.unwrap();

        let reset = reconcile(&store).await.unwrap();
        assert_eq!(reset, 1);

        let recovered = store.get(crashed.id).await.unwrap();
        assert_eq!(recovered.status, JobStatus::Enqueued);
        // The interrupted attempt still counts.
        assert_eq!(recovered.run_attempt_count, 1);
        assert!(recovered.next_eligible_at.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_other_statuses_alone() {
        let store = MemoryJobStore::new();

        let enqueued = Job::new(JobSpec::new());
        store.insert(&enqueued, &[]).await.unwrap();

        let mut done = Job::new(JobSpec::new());
        done.begin_attempt(Utc::now()).unwrap();
        done.complete(Utc::now()).unwrap();
        store.insert(&done, &[]).await.unwrap();

        assert_eq!(reconcile(&store).await.unwrap(), 0);
        assert_eq!(
            store.get(enqueued.id).await.unwrap().status,
            JobStatus::Enqueued
        );
        assert_eq!(store.get(done.id).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_reconcile_empty_store() {
        let store = MemoryJobStore::new();
        assert_eq!(reconcile(&store).await.unwrap(), 0);
    }
}
