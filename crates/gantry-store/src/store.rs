//! Job persistence store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use gantry_core::{Arguments, BackoffPolicy, Constraints, Job, JobStatus, NetworkType};

use crate::error::StoreError;
use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// How many times a database call is attempted before surfacing
/// [`StoreError::Unavailable`].
const STORE_ATTEMPTS: u32 = 3;

/// Delay between database call attempts.
const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Job store trait: jobs table plus dependency edges.
///
/// All mutations go through [`update`](JobStore::update), a
/// compare-and-swap on status, making the store the single source of
/// truth under concurrent writers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job together with its prerequisite edges, atomically.
    ///
    /// Fails with `Conflict` if the ID exists, `NotFound` if a
    /// prerequisite is not persisted, and `Cycle` if the edges would form
    /// a cycle.
    async fn insert(&self, job: &Job, prerequisites: &[Uuid]) -> Result<(), StoreError>;

    /// Current snapshot of a job.
    async fn get(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Persist a job's mutable fields iff its stored status equals
    /// `expected`; otherwise `StaleState`.
    async fn update(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError>;

    /// Jobs with the given status, FIFO by enqueue time.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Jobs with the given tag, FIFO by enqueue time.
    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError>;

    /// IDs of jobs that depend on the given job.
    async fn list_dependents(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Whether any prerequisite of the given job has not succeeded.
    async fn has_unsatisfied_prerequisites(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Whether the given job has any prerequisites at all.
    async fn has_dependencies(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete terminal jobs (and their edges) not updated since `cutoff`.
    /// Failed and cancelled jobs with a non-terminal dependent are kept:
    /// removing their edges would make the dependent dispatchable.
    /// Returns the number of jobs removed.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// In-memory job store for testing.
pub struct MemoryJobStore {
    inner: tokio::sync::RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<Uuid, Job>,
    // (prerequisite, dependent)
    edges: Vec<(Uuid, Uuid)>,
}

impl MemoryJobStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(MemoryInner::default()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_fifo(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job, prerequisites: &[Uuid]) -> Result<(), StoreError> {
        if prerequisites.contains(&job.id) {
            return Err(StoreError::Cycle(job.id));
        }
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(job.id));
        }
        for prerequisite in prerequisites {
            if !inner.jobs.contains_key(prerequisite) {
                return Err(StoreError::NotFound(*prerequisite));
            }
        }
        inner.jobs.insert(job.id, job.clone());
        for prerequisite in prerequisites {
            let edge = (*prerequisite, job.id);
            if !inner.edges.contains(&edge) {
                inner.edges.push(edge);
            }
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        let inner = self.inner.read().await;
        inner.jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::NotFound(job.id))?;
        if stored.status != expected {
            return Err(StoreError::StaleState {
                id: job.id,
                expected,
                actual: stored.status,
            });
        }
        *stored = job.clone();
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        sort_fifo(&mut jobs);
        Ok(jobs)
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.tag.as_deref() == Some(tag))
            .cloned()
            .collect();
        sort_fifo(&mut jobs);
        Ok(jobs)
    }

    async fn list_dependents(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .edges
            .iter()
            .filter(|(prerequisite, _)| *prerequisite == id)
            .map(|(_, dependent)| *dependent)
            .collect())
    }

    async fn has_unsatisfied_prerequisites(&self, id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .edges
            .iter()
            .filter(|(_, dependent)| *dependent == id)
            .any(|(prerequisite, _)| {
                inner
                    .jobs
                    .get(prerequisite)
                    .map_or(false, |p| p.status != JobStatus::Succeeded)
            }))
    }

    async fn has_dependencies(&self, id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.edges.iter().any(|(_, dependent)| *dependent == id))
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        // A failed or cancelled prerequisite still gates its pending
        // dependents; deleting it would drop the edge and unblock them.
        let doomed: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
            .filter(|j| {
                j.status == JobStatus::Succeeded
                    || !inner.edges.iter().any(|(prerequisite, dependent)| {
                        *prerequisite == j.id
                            && inner
                                .jobs
                                .get(dependent)
                                .is_some_and(|d| !d.status.is_terminal())
                    })
            })
            .map(|j| j.id)
            .collect();
        for id in &doomed {
            inner.jobs.remove(id);
        }
        inner
            .edges
            .retain(|(p, d)| !doomed.contains(p) && !doomed.contains(d));
        Ok(doomed.len() as u64)
    }
}

/// SQLite-backed job store.
///
/// Two logical tables (jobs, dependency edges) plus an opaque arguments
/// blob per job. All calls run on the connection's worker via
/// `tokio_rusqlite`; transient database failures are retried a bounded
/// number of times before surfacing [`StoreError::Unavailable`].
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await?;
        Self::init(conn, || format!("{path:?}")).await
    }

    /// Open a fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, || "in-memory".to_string()).await
    }

    async fn init(conn: Connection, describe: impl Fn() -> String) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            init_schema(conn)?;
            Ok(())
        })
        .await?;
        debug!("SqliteJobStore initialized at {}", describe());
        Ok(Self { conn })
    }

    /// Run a database closure with bounded retries on transient failures.
    ///
    /// Logical errors (conflict, not-found, stale state, cycle) pass
    /// through untouched; only `Database` errors are retried.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: Fn(&mut rusqlite::Connection) -> Result<T, StoreError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let mut last_error = None;
        for attempt in 1..=STORE_ATTEMPTS {
            let f = f.clone();
            let result: Result<Result<T, StoreError>, tokio_rusqlite::Error> =
                self.conn.call(move |conn| Ok(f(conn))).await;
            let error = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(StoreError::Database(e))) => StoreError::Database(e),
                Ok(Err(other)) => return Err(other),
                Err(e) => e.into(),
            };
            warn!("store call attempt {attempt}/{STORE_ATTEMPTS} failed: {error}");
            last_error = Some(error);
            if attempt < STORE_ATTEMPTS {
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
        }
        warn!(
            "store retries exhausted: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
        Err(StoreError::Unavailable)
    }
}

const JOB_COLUMNS: &str = "id, status, tag, requires_charging, requires_device_idle, \
     requires_battery_not_low, requires_storage_not_low, required_network, \
     initial_delay_ms, backoff_policy, backoff_base_delay_ms, period_ms, \
     max_retries, run_attempt_count, last_error, arguments, enqueued_at, \
     updated_at, next_eligible_at";

fn parse_failure(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| parse_failure(0, e))?;
    let status_str: String = row.get(1)?;
    let status =
        JobStatus::parse(&status_str).ok_or_else(|| parse_failure(1, "unknown status"))?;
    let network_str: String = row.get(7)?;
    let required_network =
        NetworkType::parse(&network_str).ok_or_else(|| parse_failure(7, "unknown network type"))?;
    let policy_str: String = row.get(9)?;
    let backoff_policy =
        BackoffPolicy::parse(&policy_str).ok_or_else(|| parse_failure(9, "unknown policy"))?;
    let initial_delay_ms: i64 = row.get(8)?;
    let backoff_base_delay_ms: i64 = row.get(10)?;
    let period_ms: Option<i64> = row.get(11)?;
    let arguments_json: String = row.get(15)?;
    let arguments: Arguments =
        serde_json::from_str(&arguments_json).map_err(|e| parse_failure(15, e))?;
    let enqueued_at: i64 = row.get(16)?;
    let updated_at: i64 = row.get(17)?;
    let next_eligible_at: Option<i64> = row.get(18)?;

    Ok(Job {
        id,
        status,
        constraints: Constraints {
            requires_charging: row.get(3)?,
            requires_device_idle: row.get(4)?,
            requires_battery_not_low: row.get(5)?,
            requires_storage_not_low: row.get(6)?,
            required_network,
            initial_delay: Duration::from_millis(initial_delay_ms.max(0) as u64),
        },
        backoff_policy,
        backoff_base_delay: Duration::from_millis(backoff_base_delay_ms.max(0) as u64),
        arguments,
        run_attempt_count: row.get(13)?,
        period: period_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
        tag: row.get(2)?,
        max_retries: row.get(12)?,
        last_error: row.get(14)?,
        enqueued_at: from_millis(enqueued_at),
        updated_at: from_millis(updated_at),
        next_eligible_at: next_eligible_at.map(from_millis),
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job, prerequisites: &[Uuid]) -> Result<(), StoreError> {
        if prerequisites.contains(&job.id) {
            return Err(StoreError::Cycle(job.id));
        }
        let id = job.id;
        let job = job.clone();
        let prerequisites = prerequisites.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                [job.id.to_string()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::Conflict(job.id));
            }
            for prerequisite in &prerequisites {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                    [prerequisite.to_string()],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(StoreError::NotFound(*prerequisite));
                }
            }

            let arguments = serde_json::to_string(&job.arguments)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            tx.execute(
                "INSERT INTO jobs (id, status, tag, requires_charging, requires_device_idle, \
                 requires_battery_not_low, requires_storage_not_low, required_network, \
                 initial_delay_ms, backoff_policy, backoff_base_delay_ms, period_ms, \
                 max_retries, run_attempt_count, last_error, arguments, enqueued_at, \
                 updated_at, next_eligible_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                 ?16, ?17, ?18, ?19)",
                params![
                    job.id.to_string(),
                    job.status.as_str(),
                    job.tag,
                    job.constraints.requires_charging,
                    job.constraints.requires_device_idle,
                    job.constraints.requires_battery_not_low,
                    job.constraints.requires_storage_not_low,
                    job.constraints.required_network.as_str(),
                    job.constraints.initial_delay.as_millis() as i64,
                    job.backoff_policy.as_str(),
                    job.backoff_base_delay.as_millis() as i64,
                    job.period.map(|p| p.as_millis() as i64),
                    job.max_retries,
                    job.run_attempt_count,
                    job.last_error,
                    arguments,
                    millis(job.enqueued_at),
                    millis(job.updated_at),
                    job.next_eligible_at.map(millis),
                ],
            )?;
            for prerequisite in &prerequisites {
                tx.execute(
                    "INSERT OR IGNORE INTO dependencies (prerequisite_id, dependent_id) \
                     VALUES (?1, ?2)",
                    params![prerequisite.to_string(), job.id.to_string()],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!("inserted job {id}");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        self.call(move |conn| {
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], job_from_row)
                .optional()?
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn update(&self, job: &Job, expected: JobStatus) -> Result<(), StoreError> {
        let job = job.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = ?1, run_attempt_count = ?2, last_error = ?3, \
                 next_eligible_at = ?4, updated_at = ?5 \
                 WHERE id = ?6 AND status = ?7",
                params![
                    job.status.as_str(),
                    job.run_attempt_count,
                    job.last_error,
                    job.next_eligible_at.map(millis),
                    millis(job.updated_at),
                    job.id.to_string(),
                    expected.as_str(),
                ],
            )?;
            if changed == 1 {
                return Ok(());
            }
            let actual: Option<String> = conn
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?1",
                    [job.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match actual.as_deref().and_then(JobStatus::parse) {
                Some(actual) => Err(StoreError::StaleState {
                    id: job.id,
                    expected,
                    actual,
                }),
                None => Err(StoreError::NotFound(job.id)),
            }
        })
        .await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 \
                 ORDER BY enqueued_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map([status.as_str()], job_from_row)?
                .collect::<rusqlite::Result<Vec<Job>>>()?;
            Ok(jobs)
        })
        .await
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Job>, StoreError> {
        let tag = tag.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE tag = ?1 \
                 ORDER BY enqueued_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let jobs = stmt
                .query_map([tag.as_str()], job_from_row)?
                .collect::<rusqlite::Result<Vec<Job>>>()?;
            Ok(jobs)
        })
        .await
    }

    async fn list_dependents(&self, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT dependent_id FROM dependencies WHERE prerequisite_id = ?1")?;
            let ids = stmt
                .query_map([id.to_string()], |row| {
                    let raw: String = row.get(0)?;
                    Uuid::parse_str(&raw).map_err(|e| parse_failure(0, e))
                })?
                .collect::<rusqlite::Result<Vec<Uuid>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn has_unsatisfied_prerequisites(&self, id: Uuid) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let unsatisfied: bool = conn.query_row(
                "SELECT EXISTS( \
                     SELECT 1 FROM dependencies d \
                     JOIN jobs p ON p.id = d.prerequisite_id \
                     WHERE d.dependent_id = ?1 AND p.status <> 'succeeded')",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(unsatisfied)
        })
        .await
    }

    async fn has_dependencies(&self, id: Uuid) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let any: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM dependencies WHERE dependent_id = ?1)",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(any)
        })
        .await
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let removed = self
            .call(move |conn| {
                // A failed or cancelled prerequisite still gates its
                // pending dependents; deleting it would drop the edge
                // (ON DELETE CASCADE) and unblock them.
                let removed = conn.execute(
                    "DELETE FROM jobs WHERE status IN ('succeeded', 'failed', 'cancelled') \
                     AND updated_at < ?1 \
                     AND (status = 'succeeded' OR NOT EXISTS ( \
                         SELECT 1 FROM dependencies d \
                         JOIN jobs c ON c.id = d.dependent_id \
                         WHERE d.prerequisite_id = jobs.id \
                         AND c.status NOT IN ('succeeded', 'failed', 'cancelled')))",
                    [millis(cutoff)],
                )?;
                Ok(removed as u64)
            })
            .await?;
        if removed > 0 {
            debug!("pruned {removed} terminal jobs");
        }
        Ok(removed)
    }
}
