//! Job record and submission spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, MIN_BACKOFF_DELAY};
use crate::constraints::{Constraints, SystemSnapshot};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Persisted job status.
///
/// "Blocked on a prerequisite" is a derived view of `Enqueued`; readiness
/// is recomputed on demand rather than persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dispatch.
    Enqueued,
    /// An attempt is in flight.
    Running,
    /// Finished successfully (terminal unless periodic).
    Succeeded,
    /// Retries exhausted (terminal).
    Failed,
    /// Cancelled by the caller (terminal).
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal for a non-periodic job.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Stable string form used by the persistence layer.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Enqueued => "enqueued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enqueued" => Some(JobStatus::Enqueued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// A primitive argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    /// UTF-8 string.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// Boolean.
    Boolean(bool),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
}

/// Ordered string-keyed arguments handed opaquely to the executor.
///
/// An empty mapping is valid and distinct from absent: the store always
/// persists the blob, even when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(Vec<(String, ArgValue)>);

impl Arguments {
    /// Create an empty argument mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any existing value and keeping its position.
    pub fn set(&mut self, key: impl Into<String>, value: ArgValue) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a string-valued key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Immutable description of a job to submit.
///
/// Built whole by the caller and passed into `submit`; the core never
/// retains a mutable builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Execution constraints.
    #[serde(default)]
    pub constraints: Constraints,
    /// Retry delay growth policy.
    #[serde(default)]
    pub backoff_policy: BackoffPolicy,
    /// Retry delay base. `None` means the system minimum.
    #[serde(default)]
    pub backoff_base_delay: Option<Duration>,
    /// Arguments handed to the executor.
    #[serde(default)]
    pub arguments: Arguments,
    /// Repeat interval for periodic jobs.
    #[serde(default)]
    pub period: Option<Duration>,
    /// Optional tag for queries.
    #[serde(default)]
    pub tag: Option<String>,
    /// Retries allowed after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl JobSpec {
    /// Spec with default constraints and backoff.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            ..Default::default()
        }
    }

    /// Set constraints.
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set backoff criteria.
    pub fn with_backoff(mut self, policy: BackoffPolicy, base: Duration) -> Self {
        self.backoff_policy = policy;
        self.backoff_base_delay = Some(base);
        self
    }

    /// Set arguments.
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Make the job periodic.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Set the query tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }
}

/// A persisted unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique ID, assigned at creation, immutable.
    pub id: Uuid,
    /// Current status. Mutated only by the state machine (and the startup
    /// reconciler).
    pub status: JobStatus,
    /// Execution constraints.
    pub constraints: Constraints,
    /// Retry delay growth policy.
    pub backoff_policy: BackoffPolicy,
    /// Retry delay base, floor-clamped to the system minimum.
    pub backoff_base_delay: Duration,
    /// Arguments handed to the executor.
    pub arguments: Arguments,
    /// Dispatches so far, including the one in flight.
    pub run_attempt_count: u32,
    /// Repeat interval for periodic jobs.
    pub period: Option<Duration>,
    /// Optional tag for queries.
    pub tag: Option<String>,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Earliest time the next attempt may run (backoff / periodic re-arm).
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new enqueued job from a spec.
    ///
    /// Timestamps are truncated to millisecond precision, the granularity
    /// the store persists.
    pub fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Enqueued,
            constraints: spec.constraints,
            backoff_policy: spec.backoff_policy,
            backoff_base_delay: spec
                .backoff_base_delay
                .unwrap_or(MIN_BACKOFF_DELAY)
                .max(MIN_BACKOFF_DELAY),
            arguments: spec.arguments,
            run_attempt_count: 0,
            period: spec.period,
            tag: spec.tag,
            max_retries: spec.max_retries,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
            next_eligible_at: None,
        }
    }

    /// Whether another retry is allowed after a failure on the current
    /// attempt count.
    pub fn can_retry(&self) -> bool {
        // Attempt n has used n - 1 retries.
        self.run_attempt_count <= self.max_retries
    }

    /// Whether the initial delay and any backoff/periodic delay have
    /// elapsed.
    pub fn delays_elapsed(&self, now: DateTime<Utc>) -> bool {
        let initial_ok = match chrono::Duration::from_std(self.constraints.initial_delay) {
            Ok(delay) => now >= self.enqueued_at + delay,
            Err(_) => false,
        };
        let eligible_ok = self.next_eligible_at.map_or(true, |t| now >= t);
        initial_ok && eligible_ok
    }

    /// Dispatch readiness against a snapshot, ignoring prerequisites.
    ///
    /// Prerequisite satisfaction is a graph query answered by the store.
    pub fn ready(&self, snapshot: &SystemSnapshot, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Enqueued
            && self.delays_elapsed(now)
            && self.constraints.satisfied_by(snapshot)
    }
}
