//! # Gantry Scheduler
//!
//! The readiness loop and its caller-facing facade:
//!
//! - `Executor` seam: the pluggable work execution collaborator
//! - `ConditionSource` seam: system condition snapshots and change
//!   notifications
//! - `Scheduler`: trigger-driven scan that dispatches runnable jobs with
//!   a compare-and-swap guard (at most one in-flight attempt per job)
//! - `Gantry`: explicit handle for submit/chain/cancel/query/prune

pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod scheduler;

pub use condition::{ConditionSource, StaticConditionSource};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use executor::{ExecutionOutcome, Executor};
pub use manager::Gantry;
pub use scheduler::{Scheduler, Trigger};
