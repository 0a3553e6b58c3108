//! Queue introspection.

use crate::job::{Job, JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many failures `QueueStatus` reports.
pub const RECENT_FAILURE_LIMIT: usize = 10;

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Dead => self.dead,
        }
    }

    pub fn add(&mut self, status: JobStatus, n: u64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Dead => &mut self.dead,
        };
        *slot += n;
    }

    pub fn total(&self) -> u64 {
        JobStatus::ALL.into_iter().map(|s| self.get(s)).sum()
    }
}

/// A job whose last attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub id: JobId,
    pub job_type: String,
    pub queue: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: String,
    pub updated_at: DateTime<Utc>,
}

impl FailureSummary {
    /// Pending-with-error, failed and dead jobs count as failures.
    pub fn from_job(job: &Job) -> Option<Self> {
        let is_failure = matches!(
            job.status,
            JobStatus::Pending | JobStatus::Failed | JobStatus::Dead
        );
        let last_error = job.last_error.as_ref().filter(|_| is_failure)?;
        Some(Self {
            id: job.id,
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            status: job.status,
            attempts: job.attempts,
            last_error: last_error.clone(),
            updated_at: job.updated_at,
        })
    }
}

/// Snapshot of the whole queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub status_counts: StatusCounts,
    /// Pending jobs per queue name
    pub pending_by_queue: BTreeMap<String, u64>,
    /// Age of the oldest pending job, in seconds
    pub oldest_pending_age_secs: Option<i64>,
    /// Most recently updated failures, newest first
    pub recent_failures: Vec<FailureSummary>,
    pub generated_at: DateTime<Utc>,
}

impl QueueStatus {
    /// Build a snapshot from a full scan of jobs.
    pub fn from_jobs<'a>(
        jobs: impl IntoIterator<Item = &'a Job>,
        now: DateTime<Utc>,
        failure_limit: usize,
    ) -> Self {
        let mut status_counts = StatusCounts::default();
        let mut pending_by_queue = BTreeMap::new();
        let mut oldest_pending: Option<DateTime<Utc>> = None;
        let mut failures = Vec::new();

        for job in jobs {
            status_counts.add(job.status, 1);
            if job.status == JobStatus::Pending {
                *pending_by_queue.entry(job.queue.clone()).or_insert(0) += 1;
                oldest_pending = Some(match oldest_pending {
                    Some(oldest) => oldest.min(job.created_at),
                    None => job.created_at,
                });
            }
            if let Some(failure) = FailureSummary::from_job(job) {
                failures.push(failure);
            }
        }

        failures.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        failures.truncate(failure_limit);

        Self {
            status_counts,
            pending_by_queue,
            oldest_pending_age_secs: oldest_pending.map(|t| (now - t).num_seconds()),
            recent_failures: failures,
            generated_at: now,
        }
    }
}
