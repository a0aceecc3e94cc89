//! Core errors.

use thiserror::Error;

use crate::job::JobStatus;

/// State machine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The requested status change is not a legal transition.
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Status the job was in.
        from: JobStatus,
        /// Status that was requested.
        to: JobStatus,
    },
}
