//! Task persistence.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryTaskStore;
#[cfg(feature = "postgres")]
pub use postgres::PgTaskStore;

use crate::error::CronResult;
use crate::task::{DueTask, ScheduledTask, TaskRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage for scheduled tasks, keyed by unique `task_name`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert unless a task with the same name exists. Returns the stored
    /// task and whether it was created.
    async fn insert_if_absent(&self, task: &ScheduledTask) -> CronResult<(ScheduledTask, bool)>;

    async fn get(&self, task_name: &str) -> CronResult<Option<ScheduledTask>>;

    async fn list(&self) -> CronResult<Vec<ScheduledTask>>;

    /// Enabled tasks with `next_run_at` unset or not after `now`.
    ///
    /// A row that fails to decode comes back as [`DueTask::Invalid`] instead
    /// of failing the whole read.
    async fn due(&self, now: DateTime<Utc>) -> CronResult<Vec<DueTask>>;

    /// Claim one occurrence of an enabled task by moving `next_run_at` from
    /// `observed` to `next_run_at` and stamping `last_run_at = now`.
    ///
    /// Returns `false` when the task changed since it was read, i.e. another
    /// tick already claimed this occurrence.
    async fn claim_run(
        &self,
        task_name: &str,
        observed: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CronResult<bool>;

    async fn record_run(&self, task_name: &str, run: &TaskRun) -> CronResult<()>;

    /// Returns `false` if no such task.
    async fn set_enabled(
        &self,
        task_name: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> CronResult<bool>;
}
