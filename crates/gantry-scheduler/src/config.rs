//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the periodic readiness tick. The tick catches
    /// delay-elapsed and constraint-became-true transitions that have no
    /// other triggering event.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// How long terminal jobs are retained before `prune` removes them,
    /// unless the caller passes an explicit retention.
    #[serde(default = "default_prune_retention")]
    pub prune_retention: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_prune_retention() -> Duration {
    // 7 days
    Duration::from_secs(7 * 24 * 60 * 60)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            prune_retention: default_prune_retention(),
        }
    }
}
