//! # Gantry Core
//!
//! Job data model and the pure parts of the scheduler:
//!
//! - Job record with constraints, backoff criteria, and opaque arguments
//! - Constraint evaluator over system condition snapshots
//! - Backoff delay calculator
//! - Job status state machine
//!
//! This crate performs no I/O; persistence and dispatch live in
//! `gantry-store` and `gantry-scheduler`.

pub mod backoff;
pub mod constraints;
pub mod error;
pub mod job;
pub mod transition;

pub use backoff::{next_delay, BackoffPolicy, MAX_BACKOFF_DELAY, MIN_BACKOFF_DELAY};
pub use constraints::{Connectivity, Constraints, NetworkType, SystemSnapshot};
pub use error::TransitionError;
pub use job::{ArgValue, Arguments, Job, JobSpec, JobStatus};
pub use transition::{transition_allowed, FailureOutcome};
