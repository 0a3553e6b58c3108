//! PostgreSQL task store.

use super::TaskStore;
use crate::error::{CronError, CronResult};
use crate::schedule::Schedule;
use crate::task::{DueTask, RunStatus, ScheduledTask, TaskRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use porter_config::DatabaseSettings;
use porter_log::{info, warn};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_porter_scheduled_tasks.sql");

const TASK_COLUMNS: &str = "id, task_name, task_type, schedule_type, schedule_config, \
    payload_template, enabled, next_run_at, last_run_at, last_run_status, last_error, \
    created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    task_name: String,
    task_type: String,
    schedule_type: String,
    schedule_config: serde_json::Value,
    payload_template: serde_json::Value,
    enabled: bool,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_run_status: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ScheduledTask {
    type Error = CronError;

    fn try_from(row: TaskRow) -> CronResult<Self> {
        Ok(ScheduledTask {
            id: row.id,
            schedule: Schedule::from_parts(&row.schedule_type, row.schedule_config)?,
            task_name: row.task_name,
            task_type: row.task_type,
            payload_template: row.payload_template,
            enabled: row.enabled,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            last_run_status: row.last_run_status.as_deref().and_then(RunStatus::parse),
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Tasks in the `porter_scheduled_tasks` table.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> CronResult<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| CronError::Store("database.url is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> CronResult<()> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        info!("Task store schema ready"; table = "porter_scheduled_tasks");
        Ok(())
    }

    async fn fetch(&self, sql: &str, now: Option<DateTime<Utc>>) -> CronResult<Vec<TaskRow>> {
        let mut query = sqlx::query_as::<_, TaskRow>(sql);
        if let Some(now) = now {
            query = query.bind(now);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert_if_absent(&self, task: &ScheduledTask) -> CronResult<(ScheduledTask, bool)> {
        let sql = format!(
            "INSERT INTO porter_scheduled_tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (task_name) DO NOTHING"
        );
        let inserted = sqlx::query(&sql)
            .bind(task.id)
            .bind(&task.task_name)
            .bind(&task.task_type)
            .bind(task.schedule.schedule_type())
            .bind(task.schedule.config())
            .bind(&task.payload_template)
            .bind(task.enabled)
            .bind(task.next_run_at)
            .bind(task.last_run_at)
            .bind(task.last_run_status.map(RunStatus::as_str))
            .bind(&task.last_error)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?
            .rows_affected()
            == 1;

        let stored = self
            .get(&task.task_name)
            .await?
            .ok_or_else(|| CronError::TaskNotFound(task.task_name.clone()))?;
        Ok((stored, inserted))
    }

    async fn get(&self, task_name: &str) -> CronResult<Option<ScheduledTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM porter_scheduled_tasks WHERE task_name = $1");
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ScheduledTask::try_from).transpose()
    }

    async fn list(&self) -> CronResult<Vec<ScheduledTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM porter_scheduled_tasks ORDER BY task_name");
        self.fetch(&sql, None)
            .await?
            .into_iter()
            .map(ScheduledTask::try_from)
            .collect()
    }

    async fn due(&self, now: DateTime<Utc>) -> CronResult<Vec<DueTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM porter_scheduled_tasks \
             WHERE enabled AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at ASC NULLS FIRST, task_name"
        );
        let rows = self.fetch(&sql, Some(now)).await?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let task_name = row.task_name.clone();
            let next_run_at = row.next_run_at;
            match ScheduledTask::try_from(row) {
                Ok(task) => due.push(DueTask::Ready(task)),
                Err(err) => {
                    warn!("Undecodable scheduled task row"; task = task_name, error = err);
                    due.push(DueTask::Invalid {
                        task_name,
                        next_run_at,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(due)
    }

    async fn claim_run(
        &self,
        task_name: &str,
        observed: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CronResult<bool> {
        let result = sqlx::query(
            "UPDATE porter_scheduled_tasks \
             SET next_run_at = $3, last_run_at = $4, updated_at = $4 \
             WHERE task_name = $1 AND enabled AND next_run_at IS NOT DISTINCT FROM $2",
        )
        .bind(task_name)
        .bind(observed)
        .bind(next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_run(&self, task_name: &str, run: &TaskRun) -> CronResult<()> {
        let result = sqlx::query(
            "UPDATE porter_scheduled_tasks \
             SET last_run_at = $2, next_run_at = $3, last_run_status = $4, last_error = $5, \
                 updated_at = $2 \
             WHERE task_name = $1",
        )
        .bind(task_name)
        .bind(run.ran_at)
        .bind(run.next_run_at)
        .bind(run.status.as_str())
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CronError::TaskNotFound(task_name.to_string()));
        }
        Ok(())
    }

    async fn set_enabled(
        &self,
        task_name: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> CronResult<bool> {
        let result = sqlx::query(
            "UPDATE porter_scheduled_tasks SET enabled = $2, updated_at = $3 WHERE task_name = $1",
        )
        .bind(task_name)
        .bind(enabled)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
