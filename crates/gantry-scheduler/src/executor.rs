//! The work execution seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gantry_core::Job;

/// What an attempt reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The attempt succeeded.
    Succeeded,
    /// The attempt failed; the message feeds the job's `last_error` and
    /// the normal retry path.
    Failed(String),
}

/// Executes job attempts.
///
/// Invoked at most once per `Enqueued -> Running` transition. The cancel
/// token is signalled when the job is cancelled mid-flight; honoring it
/// is cooperative, the scheduler does not wait for acknowledgment.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one attempt of the job.
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> ExecutionOutcome;
}
