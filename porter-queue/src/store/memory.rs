//! In-process job store.

use super::{ClaimRequest, JobStore};
use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimToken, Job, JobId, JobStatus};
use crate::retry::FailurePlan;
use crate::stats::QueueStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Jobs held in memory behind a single lock.
///
/// Every conditional write happens under the write lock, which gives the
/// same exclusivity a row lock gives the relational store. Clones share
/// the same jobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored job.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// Claim order: priority descending, then schedule, then creation.
fn claim_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.scheduled_for.cmp(&b.scheduled_for))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::Store(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn claim_next(&self, request: &ClaimRequest) -> QueueResult<Option<Job>> {
        let mut jobs = self.jobs.write().await;

        let next = jobs
            .values()
            .filter(|job| request.queue.as_deref().is_none_or(|q| job.queue == q))
            .filter(|job| job.is_claimable(request.now))
            .min_by(|a, b| claim_order(a, b))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.start_processing(&request.worker_id, request.now, request.lease);
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        id: JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.is_held_by(token) => {
                job.complete(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, id: JobId, token: &ClaimToken, plan: &FailurePlan) -> QueueResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.is_held_by(token) => {
                job.apply_failure(plan);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry_dead(&self, ids: Option<&[JobId]>, now: DateTime<Utc>) -> QueueResult<u64> {
        let mut jobs = self.jobs.write().await;
        let mut revived = 0;
        for job in jobs.values_mut() {
            if job.status != JobStatus::Dead {
                continue;
            }
            if ids.is_some_and(|ids| !ids.contains(&job.id)) {
                continue;
            }
            job.revive(now);
            revived += 1;
        }
        Ok(revived)
    }

    async fn status(&self, now: DateTime<Utc>, failure_limit: usize) -> QueueResult<QueueStatus> {
        let jobs = self.jobs.read().await;
        Ok(QueueStatus::from_jobs(jobs.values(), now, failure_limit))
    }
}
