//! Job definition and state management.

use crate::error::QueueError;
use crate::retry::{FailureOutcome, FailurePlan};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Job data payload.
pub type JobData = serde_json::Value;

/// Default queue name.
pub const DEFAULT_QUEUE: &str = "default";

/// Default maximum attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job priority levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Lowest priority
    Low = 0,
    /// Normal priority (default)
    #[default]
    Normal = 1,
    /// High priority
    High = 2,
    /// Critical priority
    Critical = 3,
}

impl JobPriority {
    /// Numeric rank, higher is claimed first.
    pub fn rank(self) -> i16 {
        self as i16
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(JobPriority::Low),
            1 => Some(JobPriority::Normal),
            2 => Some(JobPriority::High),
            3 => Some(JobPriority::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "critical" => Ok(JobPriority::Critical),
            other => Err(QueueError::Validation(format!("unknown priority '{}'", other))),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (new or awaiting retry)
    Pending,
    /// Claimed by a worker under a lease
    Processing,
    /// Finished successfully
    Completed,
    /// Failed; only observed transiently since retries go straight back to pending
    Failed,
    /// Exhausted its attempts
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    /// Completed and dead jobs never run again on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::Serialization(format!("unknown job status '{}'", s)))
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub attempt: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Proof of ownership handed out by a claim.
///
/// Commits only apply while the job is still processing under the same
/// worker and attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    pub worker_id: String,
    pub attempt: u32,
}

/// A job to be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Handler key
    pub job_type: String,

    /// Job payload data
    pub payload: JobData,

    pub status: JobStatus,

    /// Queue name
    pub queue: String,

    pub priority: JobPriority,

    /// Not claimable before this instant
    pub scheduled_for: DateTime<Utc>,

    /// Number of claims so far
    pub attempts: u32,

    pub max_attempts: u32,

    /// Lease expiry while processing
    pub locked_until: Option<DateTime<Utc>>,

    /// Worker holding the lease
    pub locked_by: Option<String>,

    /// Append-only record of failed attempts
    pub error_history: Vec<ErrorEntry>,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// When the job was dead-lettered
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job, runnable immediately.
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: JobData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            queue: queue.into(),
            priority: JobPriority::default(),
            scheduled_for: now,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            locked_until: None,
            locked_by: None,
            error_history: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Set job priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set max attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Schedule the job for later.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_for = time;
        self
    }

    /// Whether a worker may claim this job at `now`.
    ///
    /// Pending jobs are eligible once scheduled and unleased. Processing jobs
    /// become eligible again once their lease has expired.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.scheduled_for > now {
            return false;
        }
        match self.status {
            JobStatus::Pending => self.locked_until.is_none_or(|until| until <= now),
            JobStatus::Processing => self.lease_expired(now),
            _ => false,
        }
    }

    /// A processing job whose lease is gone.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.locked_until.is_some_and(|until| until <= now)
    }

    /// Check if the job can be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Token for the claim this snapshot represents.
    pub fn claim_token(&self) -> Option<ClaimToken> {
        match (&self.status, &self.locked_by) {
            (JobStatus::Processing, Some(worker_id)) => Some(ClaimToken {
                worker_id: worker_id.clone(),
                attempt: self.attempts,
            }),
            _ => None,
        }
    }

    /// Whether `token` still owns this job.
    pub fn is_held_by(&self, token: &ClaimToken) -> bool {
        self.status == JobStatus::Processing
            && self.locked_by.as_deref() == Some(token.worker_id.as_str())
            && self.attempts == token.attempt
    }

    /// Apply a claim: mark processing, take the lease and count the attempt.
    pub fn start_processing(&mut self, worker_id: &str, now: DateTime<Utc>, lease: Duration) {
        self.status = JobStatus::Processing;
        self.locked_by = Some(worker_id.to_string());
        self.locked_until = Some(now + lease);
        self.attempts += 1;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Mark job as completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.release(now);
    }

    /// Record a failed attempt and either reschedule or dead-letter.
    pub fn apply_failure(&mut self, plan: &FailurePlan) {
        self.error_history.push(plan.entry.clone());
        self.last_error = Some(plan.entry.error.clone());
        match plan.outcome {
            FailureOutcome::Retry { scheduled_for } => {
                self.status = JobStatus::Pending;
                self.scheduled_for = scheduled_for;
            }
            FailureOutcome::Dead => {
                self.status = JobStatus::Dead;
                self.failed_at = Some(plan.entry.timestamp);
            }
        }
        self.release(plan.entry.timestamp);
    }

    /// Bring a dead job back as if freshly enqueued.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.scheduled_for = now;
        self.failed_at = None;
        self.last_error = None;
        self.release(now);
    }

    fn release(&mut self, now: DateTime<Utc>) {
        self.locked_by = None;
        self.locked_until = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new(
            "default",
            "send_email",
            serde_json::json!({"to": "test@example.com"}),
            t0(),
        );

        assert_eq!(job.queue, "default");
        assert_eq!(job.job_type, "send_email");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.scheduled_for, t0());
        assert!(job.error_history.is_empty());
    }

    #[test]
    fn test_job_builder() {
        let later = t0() + Duration::hours(1);
        let job = Job::new("default", "task", serde_json::json!({}), t0())
            .with_priority(JobPriority::High)
            .with_max_attempts(5)
            .schedule_at(later);

        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.scheduled_for, later);
    }

    #[test]
    fn test_claimable_respects_schedule_and_lease() {
        let mut job = Job::new("default", "task", serde_json::json!({}), t0())
            .schedule_at(t0() + Duration::minutes(10));
        assert!(!job.is_claimable(t0()));
        assert!(job.is_claimable(t0() + Duration::minutes(10)));

        let now = t0() + Duration::minutes(10);
        job.start_processing("w1", now, Duration::minutes(5));
        assert!(!job.is_claimable(now + Duration::minutes(4)));
        assert!(job.is_claimable(now + Duration::minutes(5)));
    }

    #[test]
    fn test_completed_and_dead_are_not_claimable() {
        let mut job = Job::new("default", "task", serde_json::json!({}), t0());
        job.start_processing("w1", t0(), Duration::minutes(5));
        job.complete(t0());
        assert!(!job.is_claimable(t0() + Duration::days(1)));
        assert!(job.locked_by.is_none());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_claim_token_ownership() {
        let mut job = Job::new("default", "task", serde_json::json!({}), t0());
        assert!(job.claim_token().is_none());

        job.start_processing("w1", t0(), Duration::minutes(5));
        let token = job.claim_token().unwrap();
        assert_eq!(token.attempt, 1);
        assert!(job.is_held_by(&token));

        // another worker takes over after expiry
        job.start_processing("w2", t0() + Duration::minutes(6), Duration::minutes(5));
        assert!(!job.is_held_by(&token));
    }

    #[test]
    fn test_failure_transitions() {
        let backoff = BackoffPolicy::default();
        let mut job = Job::new("default", "task", serde_json::json!({}), t0()).with_max_attempts(2);

        job.start_processing("w1", t0(), Duration::minutes(5));
        let plan = backoff.plan(&job, "first", t0());
        job.apply_failure(&plan);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_for, t0() + Duration::minutes(2));
        assert_eq!(job.last_error.as_deref(), Some("first"));

        job.start_processing("w1", job.scheduled_for, Duration::minutes(5));
        let plan = backoff.plan(&job, "second", job.scheduled_for);
        job.apply_failure(&plan);
        assert_eq!(job.status, JobStatus::Dead);
        assert!(job.failed_at.is_some());
        assert_eq!(job.error_history.len(), 2);
        assert_eq!(job.error_history[1].attempt, 2);
    }

    #[test]
    fn test_revive() {
        let mut job = Job::new("default", "task", serde_json::json!({}), t0()).with_max_attempts(1);
        job.start_processing("w1", t0(), Duration::minutes(5));
        let plan = BackoffPolicy::default().plan(&job, "boom", t0());
        job.apply_failure(&plan);
        assert_eq!(job.status, JobStatus::Dead);

        let later = t0() + Duration::hours(3);
        job.revive(later);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.scheduled_for, later);
        assert!(job.failed_at.is_none());
        assert!(job.last_error.is_none());
        // history survives
        assert_eq!(job.error_history.len(), 1);
    }

    #[test]
    fn test_status_and_priority_strings() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
        assert_eq!("HIGH".parse::<JobPriority>().unwrap(), JobPriority::High);
        assert_eq!(JobPriority::from_rank(3), Some(JobPriority::Critical));
        assert_eq!(JobPriority::from_rank(9), None);
        assert!(JobPriority::Critical > JobPriority::Low);
    }
}
