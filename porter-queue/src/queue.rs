//! Producer-side queue API.

use crate::clock::{SharedClock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::job::{DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, Job, JobData, JobId, JobPriority};
use crate::stats::{QueueStatus, RECENT_FAILURE_LIMIT};
use crate::store::JobStore;
use chrono::{DateTime, Duration, Utc};
use porter_config::WorkerSettings;
use porter_log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum When {
    Now,
    At(DateTime<Utc>),
    After(Duration),
}

/// Options for [`Queue::enqueue_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    priority: JobPriority,
    queue: String,
    when: When,
    max_attempts: Option<u32>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::Normal,
            queue: DEFAULT_QUEUE.to_string(),
            when: When::Now,
            max_attempts: None,
        }
    }
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Put the job on a named queue.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Not claimable before `time`.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.when = When::At(time);
        self
    }

    /// Not claimable until `delay` after enqueue.
    pub fn schedule_after(mut self, delay: Duration) -> Self {
        self.when = When::After(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Result of [`Queue::retry_dead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    pub retried_count: u64,
}

/// Handle for enqueueing and inspecting jobs.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
    clock: SharedClock,
    default_max_attempts: u32,
}

impl Queue {
    /// Create a queue over `store` using the system clock.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Create a queue whose default attempt limit comes from settings.
    pub fn from_settings(store: Arc<dyn JobStore>, settings: &WorkerSettings) -> Self {
        Self::new(store).with_default_max_attempts(settings.max_attempts)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Enqueue a job with default options.
    pub async fn enqueue(&self, job_type: impl Into<String>, payload: JobData) -> QueueResult<JobId> {
        self.enqueue_with(job_type, payload, EnqueueOptions::default())
            .await
    }

    /// Enqueue a job with options.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use porter_queue::*;
    /// use std::sync::Arc;
    ///
    /// # async fn example() -> QueueResult<()> {
    /// let queue = Queue::new(Arc::new(MemoryJobStore::new()));
    /// let options = EnqueueOptions::new()
    ///     .with_priority(JobPriority::High)
    ///     .on_queue("emails")
    ///     .schedule_after(chrono::Duration::minutes(10));
    ///
    /// queue
    ///     .enqueue_with("send_email", serde_json::json!({"to": "a@example.com"}), options)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue_with(
        &self,
        job_type: impl Into<String>,
        payload: JobData,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(QueueError::Validation("job_type is required".to_string()));
        }
        if payload.is_null() {
            return Err(QueueError::Validation(format!(
                "payload is required for job type '{}'",
                job_type
            )));
        }
        if options.queue.trim().is_empty() {
            return Err(QueueError::Validation("queue name is required".to_string()));
        }
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now();
        let scheduled_for = match options.when {
            When::Now => now,
            When::At(time) => time,
            When::After(delay) => now + delay,
        };

        let job = Job::new(options.queue, job_type, payload, now)
            .with_priority(options.priority)
            .with_max_attempts(max_attempts)
            .schedule_at(scheduled_for);

        self.store.insert(&job).await?;
        debug!(
            "Enqueued job";
            job_id = job.id,
            job_type = job.job_type,
            queue = job.queue,
            priority = job.priority,
            scheduled_for = job.scheduled_for
        );
        Ok(job.id)
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Send dead jobs back to pending with a fresh attempt budget.
    ///
    /// With `ids`, only those jobs are considered; ids that are not dead
    /// are ignored.
    pub async fn retry_dead(&self, ids: Option<&[JobId]>) -> QueueResult<RetryReport> {
        let now = self.clock.now();
        let retried_count = self.store.retry_dead(ids, now).await?;
        if retried_count > 0 {
            info!("Revived dead jobs"; retried = retried_count);
        } else if ids.is_some() {
            warn!("No dead jobs matched the requested ids"; requested = ids.map_or(0, <[JobId]>::len));
        }
        Ok(RetryReport { retried_count })
    }

    /// Read-only snapshot of queue health.
    pub async fn status(&self) -> QueueResult<QueueStatus> {
        self.store
            .status(self.clock.now(), RECENT_FAILURE_LIMIT)
            .await
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("clock", &self.clock)
            .field("default_max_attempts", &self.default_max_attempts)
            .finish_non_exhaustive()
    }
}
