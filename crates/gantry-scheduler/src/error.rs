//! Scheduler errors.

use thiserror::Error;

use gantry_core::TransitionError;
use gantry_store::StoreError;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Illegal status transition requested by the caller.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The dispatch loop has stopped; no new work is accepted.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}
