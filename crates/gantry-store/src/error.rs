//! Store errors.

use thiserror::Error;
use uuid::Uuid;

use gantry_core::JobStatus;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A job with this ID already exists.
    #[error("job already exists: {0}")]
    Conflict(Uuid),

    /// No job with this ID.
    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// Compare-and-swap mismatch: the record changed under the caller.
    /// Benign for racing dispatchers; callers re-read or skip.
    #[error("stale state for job {id}: expected {expected:?}, found {actual:?}")]
    StaleState {
        /// Job whose update was rejected.
        id: Uuid,
        /// Status the caller expected.
        expected: JobStatus,
        /// Status actually persisted.
        actual: JobStatus,
    },

    /// Inserting these edges would create a dependency cycle.
    #[error("dependency cycle involving job {0}")]
    Cycle(Uuid),

    /// Underlying database error. Retried a bounded number of times by
    /// the access layer before surfacing as `Unavailable`.
    #[error("database error: {0}")]
    Database(String),

    /// Database retries exhausted.
    #[error("storage unavailable")]
    Unavailable,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
