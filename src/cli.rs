//! CLI definitions for Gantry.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Gantry CLI.
#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Durable, constraint-aware background job scheduler")]
#[command(version)]
pub(crate) struct Cli {
    /// Job database path
    #[arg(long, default_value = "gantry.db", global = true, env = "GANTRY_DB")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in foreground until interrupted
    Run {
        /// Dispatch tick interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,

        /// Days a finished job is kept before pruning
        #[arg(long, default_value_t = 7)]
        retention_days: u64,
    },

    /// Enqueue a job
    Submit {
        /// Shell command the job runs
        cmd: String,

        /// Tag for later lookup
        #[arg(short, long)]
        tag: Option<String>,

        /// Prerequisite job id (repeatable)
        #[arg(long = "after")]
        after: Vec<Uuid>,

        /// Only run while the device is charging
        #[arg(long)]
        requires_charging: bool,

        /// Only run while the device is idle
        #[arg(long)]
        requires_idle: bool,

        /// Only run while the battery is not low
        #[arg(long)]
        requires_battery_not_low: bool,

        /// Only run while storage is not low
        #[arg(long)]
        requires_storage_not_low: bool,

        /// Required network (none, any, unmetered, metered, not_roaming)
        #[arg(long)]
        network: Option<String>,

        /// Initial delay in seconds before the first attempt
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Re-run every N seconds instead of running once
        #[arg(long)]
        period_secs: Option<u64>,

        /// Retries allowed after the first failed attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Backoff policy (linear, exponential)
        #[arg(long)]
        backoff: Option<String>,

        /// Base backoff delay in seconds
        #[arg(long)]
        backoff_base_secs: Option<u64>,
    },

    /// List jobs
    List {
        /// Filter by status (enqueued, running, succeeded, failed, cancelled)
        #[arg(long)]
        status: Option<String>,

        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show one job
    Status {
        /// Job id
        id: Uuid,
    },

    /// Cancel a job
    Cancel {
        /// Job id
        id: Uuid,
    },

    /// Delete finished jobs older than the retention window
    Prune {
        /// Retention window in days
        #[arg(long, default_value_t = 7)]
        retention_days: u64,
    },
}
