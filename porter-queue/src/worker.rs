//! Lease-execute-commit worker.

use crate::clock::SharedClock;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId};
use crate::queue::Queue;
use crate::registry::HandlerRegistry;
use crate::retry::BackoffPolicy;
use crate::store::{ClaimRequest, JobStore};
use chrono::{DateTime, Duration, Utc};
use porter_config::{RetrySettings, WorkerSettings};
use porter_log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity written to `locked_by`
    pub worker_id: String,

    /// How long a claim is exclusive
    pub lease_duration: Duration,

    /// Retry delay policy
    pub backoff: BackoffPolicy,

    /// Whether to log job execution at info level
    pub log_execution: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerSettings::default().resolved_id(),
            lease_duration: Duration::minutes(5),
            backoff: BackoffPolicy::default(),
            log_execution: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(worker: &WorkerSettings, retry: &RetrySettings) -> Self {
        Self {
            worker_id: worker.resolved_id(),
            lease_duration: Duration::seconds(i64::try_from(worker.lease_secs).unwrap_or(300)),
            backoff: BackoffPolicy::from_settings(retry),
            log_execution: true,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        job_id: JobId,
        job_type: String,
    },
    Failed {
        job_id: JobId,
        job_type: String,
        error: String,
        attempt: u32,
        /// Attempts exhausted; the job is now dead
        dead: bool,
        retry_at: Option<DateTime<Utc>>,
    },
    /// Another worker took the job over before this commit landed
    LeaseLost {
        job_id: JobId,
        job_type: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            JobOutcome::Completed { job_id, .. }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::LeaseLost { job_id, .. } => *job_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, JobOutcome::Failed { dead: true, .. })
    }
}

/// Claims, runs and commits jobs one at a time.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    clock: SharedClock,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker over the queue's store and clock.
    pub fn new(queue: &Queue, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_config(queue, registry, WorkerConfig::default())
    }

    /// Create a worker with custom configuration.
    pub fn with_config(queue: &Queue, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            store: queue.store().clone(),
            clock: queue.clock().clone(),
            registry,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Take the lease on the next eligible job, if any.
    pub async fn claim_next(&self, queue: Option<&str>) -> QueueResult<Option<Job>> {
        let request = ClaimRequest {
            worker_id: self.config.worker_id.clone(),
            queue: queue.map(str::to_string),
            now: self.clock.now(),
            lease: self.config.lease_duration,
        };
        let job = self.store.claim_next(&request).await?;
        match &job {
            Some(job) if self.config.log_execution => info!(
                "Claimed job";
                job_id = job.id,
                job_type = job.job_type,
                attempt = job.attempts,
                worker = self.config.worker_id
            ),
            Some(_) => {}
            None => debug!("No job available"; queue = queue.unwrap_or("*")),
        }
        Ok(job)
    }

    /// Run the registered handler for `job`.
    ///
    /// The handler runs on its own task, so a panic surfaces as a handler
    /// error instead of unwinding through the worker.
    pub async fn execute(&self, job: &Job) -> QueueResult<()> {
        let handler = self
            .registry
            .get(&job.job_type)
            .ok_or_else(|| QueueError::UnknownJobType(job.job_type.clone()))?;

        let owned = job.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });
        match task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(QueueError::Handler(format!(
                "handler for '{}' panicked",
                job.job_type
            ))),
            Err(join_err) => Err(QueueError::Handler(join_err.to_string())),
        }
    }

    /// Mark a claimed job completed.
    pub async fn commit_success(&self, job: &Job) -> QueueResult<JobOutcome> {
        let token = Self::token(job)?;
        let now = self.clock.now();
        if !self.store.complete(job.id, &token, now).await? {
            return Ok(self.lease_lost(job));
        }
        if self.config.log_execution {
            info!("Job completed"; job_id = job.id, job_type = job.job_type, attempt = job.attempts);
        }
        Ok(JobOutcome::Completed {
            job_id: job.id,
            job_type: job.job_type.clone(),
        })
    }

    /// Record a failed attempt: reschedule with backoff or dead-letter.
    pub async fn commit_failure(&self, job: &Job, failure: &str) -> QueueResult<JobOutcome> {
        let token = Self::token(job)?;
        let plan = self.config.backoff.plan(job, failure, self.clock.now());
        if !self.store.fail(job.id, &token, &plan).await? {
            return Ok(self.lease_lost(job));
        }

        if plan.is_dead() {
            error!(
                "Job dead-lettered";
                job_id = job.id,
                job_type = job.job_type,
                attempts = job.attempts,
                error = failure
            );
        } else {
            warn!(
                "Job failed, will retry";
                job_id = job.id,
                job_type = job.job_type,
                attempt = job.attempts,
                retry_at = plan.retry_at().map(|t| t.to_rfc3339()).unwrap_or_default(),
                error = failure
            );
        }

        Ok(JobOutcome::Failed {
            job_id: job.id,
            job_type: job.job_type.clone(),
            error: failure.to_string(),
            attempt: job.attempts,
            dead: plan.is_dead(),
            retry_at: plan.retry_at(),
        })
    }

    /// Claim, execute and commit one job. `None` when nothing is eligible.
    ///
    /// Handler failures become job state; only store errors are returned.
    pub async fn process_next(&self, queue: Option<&str>) -> QueueResult<Option<JobOutcome>> {
        let Some(job) = self.claim_next(queue).await? else {
            return Ok(None);
        };

        let outcome = match self.execute(&job).await {
            Ok(()) => self.commit_success(&job).await?,
            Err(err) => self.commit_failure(&job, &err.to_string()).await?,
        };
        Ok(Some(outcome))
    }

    fn token(job: &Job) -> QueueResult<crate::job::ClaimToken> {
        job.claim_token()
            .ok_or_else(|| QueueError::Validation(format!("job {} is not claimed", job.id)))
    }

    fn lease_lost(&self, job: &Job) -> JobOutcome {
        warn!(
            "Lease lost before commit, discarding result";
            job_id = job.id,
            job_type = job.job_type,
            attempt = job.attempts,
            worker = self.config.worker_id
        );
        JobOutcome::LeaseLost {
            job_id: job.id,
            job_type: job.job_type.clone(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;
    use chrono::TimeZone;

    fn setup(registry: HandlerRegistry) -> (Queue, Worker, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        let queue = Queue::new(Arc::new(MemoryJobStore::new())).with_clock(Arc::new(clock.clone()));
        let config = WorkerConfig::default().with_worker_id("test-worker");
        let worker = Worker::with_config(&queue, Arc::new(registry), config);
        (queue, worker, clock)
    }

    #[test]
    fn test_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.lease_duration, Duration::minutes(5));
        assert!(config.worker_id.starts_with("porter-"));
        assert!(config.log_execution);

        let worker = WorkerSettings {
            id: Some("w-9".into()),
            lease_secs: 90,
            ..WorkerSettings::default()
        };
        let config = WorkerConfig::from_settings(&worker, &RetrySettings::default());
        assert_eq!(config.worker_id, "w-9");
        assert_eq!(config.lease_duration, Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_process_success() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("ok", |_job| async { Ok(()) });
        let (queue, worker, _) = setup(registry);

        let id = queue.enqueue("ok", serde_json::json!({})).await.unwrap();
        let outcome = worker.process_next(None).await.unwrap().unwrap();
        assert!(outcome.is_completed());

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.locked_by.is_none());
        assert!(worker.process_next(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_retried() {
        let (queue, worker, clock) = setup(HandlerRegistry::new());
        let id = queue.enqueue("mystery", serde_json::json!({})).await.unwrap();

        let outcome = worker.process_next(None).await.unwrap().unwrap();
        match outcome {
            JobOutcome::Failed { dead, retry_at, error, .. } => {
                assert!(!dead);
                assert_eq!(retry_at, Some(clock.now() + Duration::minutes(2)));
                assert!(error.contains("mystery"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_failure() {
        struct Explodes;

        #[async_trait::async_trait]
        impl crate::registry::Handler for Explodes {
            async fn handle(&self, _job: &Job) -> QueueResult<()> {
                panic!("kaboom")
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register("explode", Explodes);
        let (queue, worker, _) = setup(registry);

        let id = queue.enqueue("explode", serde_json::json!({})).await.unwrap();
        let outcome = worker.process_next(None).await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { .. }));

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert!(job.last_error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_commit_after_takeover_is_discarded() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("ok", |_job| async { Ok(()) });
        let (queue, w1, clock) = setup(registry.clone());
        let w2 = Worker::with_config(
            &queue,
            Arc::new(registry),
            WorkerConfig::default().with_worker_id("w2"),
        );

        let id = queue.enqueue("ok", serde_json::json!({})).await.unwrap();
        let stale = w1.claim_next(None).await.unwrap().unwrap();

        clock.advance(Duration::minutes(6));
        let fresh = w2.claim_next(None).await.unwrap().unwrap();
        assert_eq!(fresh.id, id);

        let outcome = w1.commit_failure(&stale, "too slow").await.unwrap();
        assert!(matches!(outcome, JobOutcome::LeaseLost { .. }));

        let outcome = w2.commit_success(&fresh).await.unwrap();
        assert!(outcome.is_completed());

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_history.is_empty());
    }

    #[tokio::test]
    async fn test_commit_unclaimed_job_is_rejected() {
        let (queue, worker, _) = setup(HandlerRegistry::new());
        let id = queue.enqueue("x", serde_json::json!({})).await.unwrap();
        let job = queue.get_job(id).await.unwrap().unwrap();
        assert!(matches!(
            worker.commit_success(&job).await,
            Err(QueueError::Validation(_))
        ));
    }
}
