//! Job persistence.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PgJobStore;

use crate::error::QueueResult;
use crate::job::{ClaimToken, Job, JobId};
use crate::retry::FailurePlan;
use crate::stats::QueueStatus;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Parameters of a claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub worker_id: String,
    /// Restrict to one queue; `None` claims across all queues
    pub queue: Option<String>,
    pub now: DateTime<Utc>,
    pub lease: Duration,
}

/// Storage for jobs.
///
/// `claim_next`, `complete` and `fail` must each be a single atomic
/// conditional write: no two callers may win the same claim, and commits
/// must not apply once the caller's claim has been superseded.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Claim the highest-priority, earliest-scheduled eligible job.
    async fn claim_next(&self, request: &ClaimRequest) -> QueueResult<Option<Job>>;

    /// Mark a claimed job completed. Returns `false` if the claim was lost.
    async fn complete(&self, id: JobId, token: &ClaimToken, now: DateTime<Utc>)
    -> QueueResult<bool>;

    /// Record a failed attempt. Returns `false` if the claim was lost.
    async fn fail(&self, id: JobId, token: &ClaimToken, plan: &FailurePlan) -> QueueResult<bool>;

    /// Revive dead jobs (all of them, or only `ids`). Returns the number revived.
    async fn retry_dead(&self, ids: Option<&[JobId]>, now: DateTime<Utc>) -> QueueResult<u64>;

    async fn status(&self, now: DateTime<Utc>, failure_limit: usize) -> QueueResult<QueueStatus>;
}
