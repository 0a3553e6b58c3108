//! Retry backoff and failure planning.

use crate::job::{ErrorEntry, Job};
use chrono::{DateTime, Duration, Utc};
use porter_config::RetrySettings;

/// Exponential backoff: `base * 2^attempts`, never more than `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::minutes(1),
            cap: Duration::hours(24),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        let secs = |s: u64| Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1_000));
        Self::new(secs(settings.base_secs), secs(settings.cap_secs))
    }

    /// Delay before the next attempt after `attempts` claims.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2_i32
            .checked_pow(attempts)
            .and_then(|f| self.base.checked_mul(f));
        match factor {
            Some(delay) if delay < self.cap => delay,
            _ => self.cap,
        }
    }

    /// Decide what a failed attempt turns into.
    pub fn plan(&self, job: &Job, error: impl Into<String>, now: DateTime<Utc>) -> FailurePlan {
        let entry = ErrorEntry {
            attempt: job.attempts,
            error: error.into(),
            timestamp: now,
        };
        let outcome = if job.can_retry() {
            FailureOutcome::Retry {
                scheduled_for: now + self.delay(job.attempts),
            }
        } else {
            FailureOutcome::Dead
        };
        FailurePlan { entry, outcome }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, claimable at `scheduled_for`
    Retry { scheduled_for: DateTime<Utc> },
    /// Attempts exhausted
    Dead,
}

/// The write a failed attempt should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePlan {
    pub entry: ErrorEntry,
    pub outcome: FailureOutcome,
}

impl FailurePlan {
    pub fn is_dead(&self) -> bool {
        self.outcome == FailureOutcome::Dead
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self.outcome {
            FailureOutcome::Retry { scheduled_for } => Some(scheduled_for),
            FailureOutcome::Dead => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::minutes(2));
        assert_eq!(policy.delay(2), Duration::minutes(4));
        assert_eq!(policy.delay(3), Duration::minutes(8));
        assert_eq!(policy.delay(10), Duration::minutes(1024));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(11), Duration::hours(24));
        assert_eq!(policy.delay(40), Duration::hours(24));
        assert_eq!(policy.delay(u32::MAX), Duration::hours(24));
    }

    #[test]
    fn test_delay_strictly_increases_below_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (1..=10).map(|a| policy.delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_from_settings() {
        let policy = BackoffPolicy::from_settings(&RetrySettings {
            base_secs: 30,
            cap_secs: 300,
        });
        assert_eq!(policy.delay(1), Duration::seconds(60));
        assert_eq!(policy.delay(4), Duration::seconds(300));
    }
}
