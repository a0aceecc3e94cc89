//! Job status state machine.
//!
//! Legal transitions:
//!
//! ```text
//! Enqueued --dispatch--> Running
//! Running  --success-->  Succeeded   (or re-arm to Enqueued if periodic)
//! Running  --failure-->  Enqueued    (retries remaining, after backoff)
//! Running  --failure-->  Failed      (retries exhausted)
//! Enqueued --cancel-->   Cancelled
//! Running  --cancel-->   Cancelled
//! ```
//!
//! Anything else is rejected without mutating the record. Dependent jobs
//! are not walked here; the scheduler re-queries prerequisite satisfaction
//! lazily, keeping the state machine single-job-scoped.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::backoff::next_delay;
use crate::error::TransitionError;
use crate::job::{Job, JobStatus};

/// Whether `from -> to` is a legal status transition.
pub fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Enqueued, Running)
            | (Running, Succeeded)
            | (Running, Enqueued)
            | (Running, Failed)
            | (Enqueued, Cancelled)
            | (Running, Cancelled)
    )
}

fn check(from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError::IllegalTransition { from, to })
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-armed as enqueued; next attempt after the given backoff delay.
    Retrying(Duration),
    /// Retries exhausted; the job is failed.
    Exhausted,
    /// Periodic job with retries exhausted; re-armed for its next period.
    NextPeriod,
}

impl Job {
    /// Dispatch: `Enqueued -> Running`, incrementing the attempt count.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        check(self.status, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.run_attempt_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Successful completion: `Running -> Succeeded`, or back to
    /// `Enqueued` at the next period for periodic jobs.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.period {
            None => {
                check(self.status, JobStatus::Succeeded)?;
                self.status = JobStatus::Succeeded;
                self.next_eligible_at = None;
            }
            Some(period) => {
                check(self.status, JobStatus::Enqueued)?;
                self.status = JobStatus::Enqueued;
                self.run_attempt_count = 0;
                self.next_eligible_at = next_instant(now, period);
            }
        }
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    /// Failed completion: re-arm with backoff while retries remain,
    /// otherwise `Failed` (periodic jobs re-arm for their next period
    /// instead and start a fresh attempt budget).
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, TransitionError> {
        let outcome = if self.can_retry() {
            check(self.status, JobStatus::Enqueued)?;
            let delay = next_delay(
                self.backoff_policy,
                self.backoff_base_delay,
                self.run_attempt_count,
            );
            self.status = JobStatus::Enqueued;
            self.next_eligible_at = next_instant(now, delay);
            FailureOutcome::Retrying(delay)
        } else if let Some(period) = self.period {
            check(self.status, JobStatus::Enqueued)?;
            self.status = JobStatus::Enqueued;
            self.run_attempt_count = 0;
            self.next_eligible_at = next_instant(now, period);
            FailureOutcome::NextPeriod
        } else {
            check(self.status, JobStatus::Failed)?;
            self.status = JobStatus::Failed;
            FailureOutcome::Exhausted
        };
        self.last_error = Some(error.into());
        self.updated_at = now;
        Ok(outcome)
    }

    /// Cancellation. Returns `Ok(false)` when the job is already
    /// cancelled (idempotent no-op); cancelling a succeeded or failed job
    /// is an illegal transition.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if self.status == JobStatus::Cancelled {
            return Ok(false);
        }
        check(self.status, JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.updated_at = now;
        Ok(true)
    }
}

fn next_instant(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay).ok().map(|d| now + d)
}
