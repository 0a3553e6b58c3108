//! In-process task store.

use super::TaskStore;
use crate::error::{CronError, CronResult};
use crate::task::{DueTask, ScheduledTask, TaskRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tasks held in memory. Clones share the same tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, ScheduledTask>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_if_absent(&self, task: &ScheduledTask) -> CronResult<(ScheduledTask, bool)> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&task.task_name) {
            return Ok((existing.clone(), false));
        }
        tasks.insert(task.task_name.clone(), task.clone());
        Ok((task.clone(), true))
    }

    async fn get(&self, task_name: &str) -> CronResult<Option<ScheduledTask>> {
        Ok(self.tasks.read().await.get(task_name).cloned())
    }

    async fn list(&self) -> CronResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(tasks)
    }

    async fn due(&self, now: DateTime<Utc>) -> CronResult<Vec<DueTask>> {
        let mut due: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_run_at
                .cmp(&b.next_run_at)
                .then_with(|| a.task_name.cmp(&b.task_name))
        });
        Ok(due.into_iter().map(DueTask::Ready).collect())
    }

    async fn claim_run(
        &self,
        task_name: &str,
        observed: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CronResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_name) {
            Some(task) if task.enabled && task.next_run_at == observed => {
                task.next_run_at = Some(next_run_at);
                task.last_run_at = Some(now);
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_run(&self, task_name: &str, run: &TaskRun) -> CronResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_name)
            .ok_or_else(|| CronError::TaskNotFound(task_name.to_string()))?;
        task.record(run);
        Ok(())
    }

    async fn set_enabled(
        &self,
        task_name: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> CronResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_name) {
            Some(task) => {
                task.enabled = enabled;
                task.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
