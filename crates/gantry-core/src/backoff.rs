//! Retry backoff calculator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum backoff base delay. Smaller bases are clamped up, never rejected.
pub const MIN_BACKOFF_DELAY: Duration = Duration::from_secs(30);

/// Maximum delay any backoff computation may produce.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(5 * 60 * 60);

/// How the retry delay grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Delay grows linearly: `base * attempt`.
    Linear,
    /// Delay doubles each attempt: `base * 2^(attempt - 1)`.
    Exponential,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential
    }
}

impl BackoffPolicy {
    /// Stable string form used by the persistence layer and CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            BackoffPolicy::Linear => "linear",
            BackoffPolicy::Exponential => "exponential",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linear" => Some(BackoffPolicy::Linear),
            "exponential" => Some(BackoffPolicy::Exponential),
            _ => None,
        }
    }
}

/// Compute the delay before the next retry of a job that has failed
/// `attempt` times (`attempt >= 1`).
///
/// The very first run of a job uses no backoff at all; this function is
/// only consulted after a failure. The base is floor-clamped to
/// [`MIN_BACKOFF_DELAY`] and the result ceiling-clamped to
/// [`MAX_BACKOFF_DELAY`].
pub fn next_delay(policy: BackoffPolicy, base: Duration, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base = base.max(MIN_BACKOFF_DELAY);

    let delay = match policy {
        BackoffPolicy::Linear => base.saturating_mul(attempt),
        BackoffPolicy::Exponential => {
            // 2^(attempt-1), saturating well past the clamp.
            let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
            base.saturating_mul(factor)
        }
    };

    delay.min(MAX_BACKOFF_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(50);

    #[test]
    fn test_linear_growth() {
        assert_eq!(next_delay(BackoffPolicy::Linear, BASE, 1), BASE);
        assert_eq!(next_delay(BackoffPolicy::Linear, BASE, 2), BASE * 2);
        assert_eq!(next_delay(BackoffPolicy::Linear, BASE, 5), BASE * 5);
    }

    #[test]
    fn test_exponential_growth() {
        assert_eq!(next_delay(BackoffPolicy::Exponential, BASE, 1), BASE);
        assert_eq!(next_delay(BackoffPolicy::Exponential, BASE, 2), BASE * 2);
        assert_eq!(next_delay(BackoffPolicy::Exponential, BASE, 4), BASE * 8);
    }

    #[test]
    fn test_base_clamped_to_minimum() {
        let tiny = Duration::from_millis(1);
        assert_eq!(
            next_delay(BackoffPolicy::Linear, tiny, 1),
            MIN_BACKOFF_DELAY
        );
        assert_eq!(
            next_delay(BackoffPolicy::Exponential, tiny, 2),
            MIN_BACKOFF_DELAY * 2
        );
    }

    #[test]
    fn test_result_clamped_to_maximum() {
        assert_eq!(
            next_delay(BackoffPolicy::Exponential, BASE, 30),
            MAX_BACKOFF_DELAY
        );
        // Shift overflow far past 32 attempts still clamps instead of panicking.
        assert_eq!(
            next_delay(BackoffPolicy::Exponential, BASE, 64),
            MAX_BACKOFF_DELAY
        );
    }

    #[test]
    fn test_monotonically_non_decreasing() {
        for policy in [BackoffPolicy::Linear, BackoffPolicy::Exponential] {
            let mut previous = Duration::ZERO;
            for attempt in 1..40 {
                let delay = next_delay(policy, BASE, attempt);
                assert!(delay >= previous, "{policy:?} decreased at attempt {attempt}");
                previous = delay;
            }
        }
    }
}
