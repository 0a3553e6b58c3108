//! Recurring task scheduler.

use crate::error::{CronError, CronResult};
use crate::store::TaskStore;
use crate::task::{DueTask, RunStatus, ScheduledTask, TaskRun};
use chrono::{DateTime, Duration, Utc};
use porter_config::SchedulerSettings;
use porter_log::{debug, info, warn};
use porter_queue::{EnqueueOptions, JobId, JobPriority, Queue};
use serde::Serialize;
use std::sync::Arc;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Queue every scheduled job lands on
    pub queue: String,

    pub priority: JobPriority,

    /// Delay used when a task's next run cannot be computed
    pub fallback_delay: Duration,

    /// Whether to log each enqueued task at info level
    pub log_execution: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: "scheduled".to_string(),
            priority: JobPriority::Normal,
            fallback_delay: Duration::hours(1),
            log_execution: true,
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            queue: settings.queue.clone(),
            fallback_delay: Duration::seconds(
                i64::try_from(settings.fallback_secs).unwrap_or(3_600),
            ),
            ..Self::default()
        }
    }
}

/// Outcome for one due task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunResult {
    pub task_name: String,
    pub status: RunStatus,
    pub job_id: Option<JobId>,
    pub next_run_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub processed_tasks: usize,
    pub results: Vec<TaskRunResult>,
}

impl TickReport {
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == RunStatus::Failed)
            .count()
    }
}

/// Turns due task definitions into queued jobs.
///
/// Holds no timer: call [`tick`](Self::tick) from whatever trigger drives
/// the deployment.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    queue: Queue,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, queue: Queue) -> Self {
        Self::with_config(store, queue, SchedulerConfig::default())
    }

    pub fn with_config(store: Arc<dyn TaskStore>, queue: Queue, config: SchedulerConfig) -> Self {
        debug!(
            "Scheduler config";
            queue = config.queue,
            fallback_secs = config.fallback_delay.num_seconds()
        );
        Self {
            store,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a task unless one with the same name exists.
    ///
    /// An existing definition is returned unchanged. A new one is stamped
    /// with the queue's clock.
    pub async fn ensure_task(&self, mut task: ScheduledTask) -> CronResult<ScheduledTask> {
        task.schedule.validate()?;
        if task.task_type.trim().is_empty() {
            return Err(CronError::InvalidSchedule(format!(
                "task '{}' has no task_type",
                task.task_name
            )));
        }

        let now = self.queue.now();
        task.created_at = now;
        task.updated_at = now;

        let (stored, created) = self.store.insert_if_absent(&task).await?;
        if created {
            info!(
                "Registered scheduled task";
                task = stored.task_name,
                task_type = stored.task_type,
                schedule = stored.schedule.schedule_type()
            );
        } else {
            debug!("Scheduled task already registered"; task = stored.task_name);
        }
        Ok(stored)
    }

    pub async fn enable_task(&self, task_name: &str) -> CronResult<()> {
        self.set_enabled(task_name, true).await
    }

    /// Disabled tasks are skipped by `tick` but never deleted.
    pub async fn disable_task(&self, task_name: &str) -> CronResult<()> {
        self.set_enabled(task_name, false).await
    }

    async fn set_enabled(&self, task_name: &str, enabled: bool) -> CronResult<()> {
        if !self
            .store
            .set_enabled(task_name, enabled, self.queue.now())
            .await?
        {
            return Err(CronError::TaskNotFound(task_name.to_string()));
        }
        info!("Scheduled task toggled"; task = task_name, enabled = enabled);
        Ok(())
    }

    pub async fn get_task(&self, task_name: &str) -> CronResult<Option<ScheduledTask>> {
        self.store.get(task_name).await
    }

    pub async fn list_tasks(&self) -> CronResult<Vec<ScheduledTask>> {
        self.store.list().await
    }

    /// Enqueue a job for every due task and advance its schedule.
    ///
    /// Each occurrence is claimed with a conditional write before its job is
    /// enqueued, so overlapping ticks enqueue it once. A failure on one task
    /// is recorded in that task's result and does not stop the others. Only
    /// failing to read the due tasks is an error.
    pub async fn tick(&self, now: DateTime<Utc>) -> CronResult<TickReport> {
        let due = self.store.due(now).await?;
        let mut report = TickReport::default();

        for entry in due {
            let result = match entry {
                DueTask::Ready(task) => self.run_task(&task, now).await,
                DueTask::Invalid {
                    task_name,
                    next_run_at,
                    error,
                } => self.skip_invalid(&task_name, next_run_at, &error, now).await,
            };
            if let Some(result) = result {
                report.processed_tasks += 1;
                report.results.push(result);
            }
        }

        if report.processed_tasks > 0 {
            info!(
                "Scheduler tick finished";
                processed = report.processed_tasks,
                failed = report.failed_count()
            );
        }
        Ok(report)
    }

    /// `None` when another tick claimed this occurrence first.
    async fn run_task(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Option<TaskRunResult> {
        let mut errors = Vec::new();

        // advance even when the enqueue fails so the task does not stall
        let next_run_at = match task.schedule.next_after(now) {
            Ok(next) => next,
            Err(err) => {
                errors.push(format!("next run unavailable: {}", err));
                now + self.config.fallback_delay
            }
        };

        if let Err(err) = self.claim(&task.task_name, task.next_run_at, next_run_at, now).await? {
            return Some(self.failed(&task.task_name, next_run_at, err));
        }

        let options = EnqueueOptions::new()
            .on_queue(self.config.queue.clone())
            .with_priority(self.config.priority)
            .schedule_at(now);
        let job_id = match self
            .queue
            .enqueue_with(&task.task_type, task.payload_template.clone(), options)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                errors.push(format!("enqueue failed: {}", err));
                None
            }
        };

        Some(self.finish(&task.task_name, job_id, next_run_at, errors, now).await)
    }

    /// Push an undecodable task past the fallback delay and record why.
    async fn skip_invalid(
        &self,
        task_name: &str,
        observed: Option<DateTime<Utc>>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Option<TaskRunResult> {
        let next_run_at = now + self.config.fallback_delay;
        if let Err(err) = self.claim(task_name, observed, next_run_at, now).await? {
            return Some(self.failed(task_name, next_run_at, err));
        }
        let errors = vec![format!("invalid definition: {}", error)];
        Some(self.finish(task_name, None, next_run_at, errors, now).await)
    }

    /// `None` when the claim was lost, `Some(Err)` when the claim write failed.
    async fn claim(
        &self,
        task_name: &str,
        observed: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Result<(), String>> {
        match self
            .store
            .claim_run(task_name, observed, next_run_at, now)
            .await
        {
            Ok(true) => Some(Ok(())),
            Ok(false) => {
                debug!("Scheduled run already claimed"; task = task_name);
                None
            }
            Err(err) => Some(Err(format!("claim failed: {}", err))),
        }
    }

    fn failed(&self, task_name: &str, next_run_at: DateTime<Utc>, error: String) -> TaskRunResult {
        warn!("Scheduled task failed"; task = task_name, error = error);
        TaskRunResult {
            task_name: task_name.to_string(),
            status: RunStatus::Failed,
            job_id: None,
            next_run_at,
            error: Some(error),
        }
    }

    async fn finish(
        &self,
        task_name: &str,
        job_id: Option<JobId>,
        next_run_at: DateTime<Utc>,
        mut errors: Vec<String>,
        now: DateTime<Utc>,
    ) -> TaskRunResult {
        let status = if errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        let run = TaskRun {
            ran_at: now,
            next_run_at,
            status,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };

        let mut result = TaskRunResult {
            task_name: task_name.to_string(),
            status,
            job_id,
            next_run_at,
            error: run.error.clone(),
        };

        if let Err(err) = self.store.record_run(task_name, &run).await {
            errors.push(format!("record failed: {}", err));
            result.status = RunStatus::Failed;
            result.error = Some(errors.join("; "));
        }

        match (&result.error, job_id) {
            (Some(error), _) => warn!(
                "Scheduled task failed";
                task = task_name,
                next_run_at = next_run_at,
                error = error
            ),
            (None, Some(job_id)) if self.config.log_execution => info!(
                "Scheduled task enqueued";
                task = task_name,
                job_id = job_id,
                next_run_at = next_run_at
            ),
            _ => {}
        }
        result
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
