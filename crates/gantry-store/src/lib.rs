//! # Gantry Store
//!
//! Durable persistence for jobs and their dependency edges:
//!
//! - `JobStore` trait with SQLite and in-memory implementations
//! - Atomic insert of a job together with its prerequisite edges
//! - Compare-and-swap status updates (the scheduler's dispatch guard)
//! - Graph queries in O(edges touching a job)
//! - Startup reconciliation of jobs left `Running` by an unclean shutdown

pub mod error;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use reconcile::reconcile;
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
