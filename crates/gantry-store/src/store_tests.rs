
use super::*;
use gantry_core::JobSpec;
use std::sync::Arc;
use tempfile::TempDir;

fn job() -> Job {
    Job::new(JobSpec::new())
}

fn tagged(tag: &str) -> Job {
    Job::new(JobSpec::new().with_tag(tag))
}

async fn stores() -> Vec<Arc<dyn JobStore>> {
    vec![
        Arc::new(MemoryJobStore::new()),
        Arc::new(SqliteJobStore::in_memory().await.unwrap()),
    ]
}

#[tokio::test]
async fn test_insert_and_get() {
    for store in stores().await {
        let mut job = job();
        job.arguments.set("cmd", gantry_core::ArgValue::String("true".into()));
        store.insert(&job, &[]).await.unwrap();

        let loaded = store.get(job.id).await.unwrap();
        assert_eq!(loaded, job);
    }
}

#[tokio::test]
async fn test_insert_duplicate_is_conflict() {
    for store in stores().await {
        let job = job();
        store.insert(&job, &[]).await.unwrap();

        let result = store.insert(&job, &[]).await;
        assert!(matches!(result, Err(StoreError::Conflict(id)) if id == job.id));
    }
}

#[tokio::test]
async fn test_insert_unknown_prerequisite_is_not_found() {
    for store in stores().await {
        let job = job();
        let missing = Uuid::new_v4();

        let result = store.insert(&job, &[missing]).await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == missing));
        // Atomic: the job itself must not have been persisted either.
        assert!(matches!(
            store.get(job.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_insert_self_prerequisite_is_cycle() {
    for store in stores().await {
        let job = job();
        let result = store.insert(&job, &[job.id]).await;
        assert!(matches!(result, Err(StoreError::Cycle(id)) if id == job.id));
    }
}

#[tokio::test]
async fn test_get_unknown_is_not_found() {
    for store in stores().await {
        let result = store.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}

#[tokio::test]
async fn test_update_cas_succeeds_on_expected_status() {
    for store in stores().await {
        let mut job = job();
        store.insert(&job, &[]).await.unwrap();

        job.begin_attempt(Utc::now()).unwrap();
        store.update(&job, JobStatus::Enqueued).await.unwrap();

        let loaded = store.get(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.run_attempt_count, 1);
    }
}

#[tokio::test]
async fn test_update_cas_mismatch_is_stale_state() {
    for store in stores().await {
        let mut job = job();
        store.insert(&job, &[]).await.unwrap();

        job.begin_attempt(Utc::now()).unwrap();
        store.update(&job, JobStatus::Enqueued).await.unwrap();

        // Second writer still thinks the job is enqueued.
        let result = store.update(&job, JobStatus::Enqueued).await;
        match result {
            Err(StoreError::StaleState {
                expected, actual, ..
            }) => {
                assert_eq!(expected, JobStatus::Enqueued);
                assert_eq!(actual, JobStatus::Running);
            }
            other => panic!("expected StaleState, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_update_unknown_is_not_found() {
    for store in stores().await {
        let job = job();
        let result = store.update(&job, JobStatus::Enqueued).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}

#[tokio::test]
async fn test_concurrent_cas_exactly_one_winner() {
    for store in stores().await {
        let mut job = job();
        store.insert(&job, &[]).await.unwrap();
        job.begin_attempt(Utc::now()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let job = job.clone();
            handles.push(tokio::spawn(async move {
                store.update(&job, JobStatus::Enqueued).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(StoreError::StaleState { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Running);
    }
}

#[tokio::test]
async fn test_graph_queries() {
    for store in stores().await {
        let a = job();
        let b = job();
        let c = job();
        store.insert(&a, &[]).await.unwrap();
        store.insert(&b, &[a.id]).await.unwrap();
        store.insert(&c, &[a.id, b.id]).await.unwrap();

        assert!(!store.has_dependencies(a.id).await.unwrap());
        assert!(store.has_dependencies(b.id).await.unwrap());
        assert!(store.has_dependencies(c.id).await.unwrap());

        let mut dependents = store.list_dependents(a.id).await.unwrap();
        dependents.sort();
        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(dependents, expected);

        assert!(!store.has_unsatisfied_prerequisites(a.id).await.unwrap());
        assert!(store.has_unsatisfied_prerequisites(b.id).await.unwrap());
        assert!(store.has_unsatisfied_prerequisites(c.id).await.unwrap());
    }
}

#[tokio::test]
async fn test_prerequisite_satisfied_after_success() {
    for store in stores().await {
        let mut a = job();
        let b = job();
        store.insert(&a, &[]).await.unwrap();
        store.insert(&b, &[a.id]).await.unwrap();

        a.begin_attempt(Utc::now()).unwrap();
        store.update(&a, JobStatus::Enqueued).await.unwrap();
        assert!(store.has_unsatisfied_prerequisites(b.id).await.unwrap());

        a.complete(Utc::now()).unwrap();
        store.update(&a, JobStatus::Running).await.unwrap();
        assert!(!store.has_unsatisfied_prerequisites(b.id).await.unwrap());
    }
}

#[tokio::test]
async fn test_list_by_status_fifo() {
    for store in stores().await {
        let mut first = job();
        first.enqueued_at = Utc::now() - chrono::Duration::seconds(10);
        let second = job();
        // Insert out of order.
        store.insert(&second, &[]).await.unwrap();
        store.insert(&first, &[]).await.unwrap();

        let enqueued = store.list_by_status(JobStatus::Enqueued).await.unwrap();
        assert_eq!(enqueued.len(), 2);
        assert_eq!(enqueued[0].id, first.id);
        assert_eq!(enqueued[1].id, second.id);

        assert!(store
            .list_by_status(JobStatus::Running)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_list_by_tag() {
    for store in stores().await {
        let sync = tagged("sync");
        let upload = tagged("upload");
        let untagged = job();
        store.insert(&sync, &[]).await.unwrap();
        store.insert(&upload, &[]).await.unwrap();
        store.insert(&untagged, &[]).await.unwrap();

        let found = store.list_by_tag("sync").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, sync.id);
        assert!(store.list_by_tag("nope").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_prune_removes_old_terminal_jobs_only() {
    for store in stores().await {
        let mut done = job();
        done.begin_attempt(Utc::now()).unwrap();
        done.complete(Utc::now()).unwrap();
        done.updated_at = Utc::now() - chrono::Duration::days(10);

        let pending = job();
        let mut recent = job();
        recent.begin_attempt(Utc::now()).unwrap();
        recent.complete(Utc::now()).unwrap();

        // Insert the terminal rows as-is; prune only looks at status and age.
        store.insert(&done, &[]).await.unwrap();
        store.insert(&pending, &[done.id]).await.unwrap();
        store.insert(&recent, &[]).await.unwrap();

        let removed = store
            .prune(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(
            store.get(done.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.get(pending.id).await.is_ok());
        assert!(store.get(recent.id).await.is_ok());
        // Edges touching the pruned job are gone with it.
        assert!(!store.has_dependencies(pending.id).await.unwrap());
    }
}

#[tokio::test]
async fn test_prune_keeps_failed_prerequisite_of_pending_dependent() {
    for store in stores().await {
        let mut a = Job::new(JobSpec::new().with_max_retries(0));
        let b = job();
        store.insert(&a, &[]).await.unwrap();
        store.insert(&b, &[a.id]).await.unwrap();

        a.begin_attempt(Utc::now()).unwrap();
        store.update(&a, JobStatus::Enqueued).await.unwrap();
        a.fail("boom", Utc::now()).unwrap();
        a.updated_at = Utc::now() - chrono::Duration::days(10);
        store.update(&a, JobStatus::Running).await.unwrap();

        assert_eq!(store.get(a.id).await.unwrap().status, JobStatus::Failed);
        assert!(store.has_unsatisfied_prerequisites(b.id).await.unwrap());

        // However old, a failed prerequisite must outlive its pending
        // dependent: dropping the edge would make b dispatchable.
        let removed = store
            .prune(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(store.get(a.id).await.is_ok());
        assert!(store.has_unsatisfied_prerequisites(b.id).await.unwrap());
    }
}

#[tokio::test]
async fn test_prune_removes_failed_job_once_dependents_settle() {
    for store in stores().await {
        let mut a = Job::new(JobSpec::new().with_max_retries(0));
        let mut b = job();
        store.insert(&a, &[]).await.unwrap();
        store.insert(&b, &[a.id]).await.unwrap();

        a.begin_attempt(Utc::now()).unwrap();
        store.update(&a, JobStatus::Enqueued).await.unwrap();
        a.fail("boom", Utc::now()).unwrap();
        a.updated_at = Utc::now() - chrono::Duration::days(10);
        store.update(&a, JobStatus::Running).await.unwrap();

        // The caller gives up on the chain and cancels the dependent.
        b.cancel(Utc::now()).unwrap();
        store.update(&b, JobStatus::Enqueued).await.unwrap();

        let removed = store
            .prune(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(store.get(a.id).await, Err(StoreError::NotFound(_))));
        assert!(store.get(b.id).await.is_ok());
    }
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gantry.db");

    let job = tagged("durable");
    {
        let store = SqliteJobStore::open(&path).await.unwrap();
        store.insert(&job, &[]).await.unwrap();
    }

    let store = SqliteJobStore::open(&path).await.unwrap();
    let loaded = store.get(job.id).await.unwrap();
    assert_eq!(loaded.tag.as_deref(), Some("durable"));
    assert_eq!(loaded, job);
}
