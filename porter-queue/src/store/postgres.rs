//! PostgreSQL job store.

use super::{ClaimRequest, JobStore};
use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimToken, ErrorEntry, Job, JobId, JobPriority, JobStatus};
use crate::retry::{FailureOutcome, FailurePlan};
use crate::stats::{FailureSummary, QueueStatus, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use porter_config::DatabaseSettings;
use porter_log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_porter_jobs.sql");

const JOB_COLUMNS: &str = "id, job_type, payload, status, queue, priority, scheduled_for, \
    attempts, max_attempts, locked_until, locked_by, error_history, last_error, \
    created_at, updated_at, started_at, completed_at, failed_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    queue: String,
    priority: i16,
    scheduled_for: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    error_history: Json<Vec<ErrorEntry>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> QueueResult<Self> {
        let priority = JobPriority::from_rank(row.priority).ok_or_else(|| {
            QueueError::Serialization(format!("unknown priority rank {}", row.priority))
        })?;
        Ok(Job {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            status: row.status.parse()?,
            queue: row.queue,
            priority,
            scheduled_for: row.scheduled_for,
            attempts: to_u32(row.attempts),
            max_attempts: to_u32(row.max_attempts),
            locked_until: row.locked_until,
            locked_by: row.locked_by,
            error_history: row.error_history.0,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
        })
    }
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Jobs in the `porter_jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `database` settings section.
    pub async fn connect(settings: &DatabaseSettings) -> QueueResult<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| QueueError::Config("database.url is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the jobs table and indexes if they do not exist.
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        info!("Job store schema ready"; table = "porter_jobs");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let sql = format!(
            "INSERT INTO porter_jobs ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        sqlx::query(&sql)
            .bind(job.id)
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.status.as_str())
            .bind(&job.queue)
            .bind(job.priority.rank())
            .bind(job.scheduled_for)
            .bind(to_i32(job.attempts))
            .bind(to_i32(job.max_attempts))
            .bind(job.locked_until)
            .bind(&job.locked_by)
            .bind(Json(&job.error_history))
            .bind(&job.last_error)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.failed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM porter_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn claim_next(&self, request: &ClaimRequest) -> QueueResult<Option<Job>> {
        let sql = format!(
            "UPDATE porter_jobs \
             SET status = 'processing', locked_by = $2, locked_until = $3, \
                 attempts = attempts + 1, started_at = $1, updated_at = $1 \
             WHERE id = ( \
                 SELECT id FROM porter_jobs \
                 WHERE scheduled_for <= $1 \
                   AND ((status = 'pending' AND (locked_until IS NULL OR locked_until <= $1)) \
                        OR (status = 'processing' AND locked_until <= $1)) \
                   AND ($4::text IS NULL OR queue = $4) \
                 ORDER BY priority DESC, scheduled_for ASC, created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(request.now)
            .bind(&request.worker_id)
            .bind(request.now + request.lease)
            .bind(request.queue.as_deref())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn complete(
        &self,
        id: JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE porter_jobs \
             SET status = 'completed', completed_at = $2, updated_at = $2, \
                 locked_by = NULL, locked_until = NULL \
             WHERE id = $1 AND status = 'processing' AND locked_by = $3 AND attempts = $4",
        )
        .bind(id)
        .bind(now)
        .bind(&token.worker_id)
        .bind(to_i32(token.attempt))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: JobId, token: &ClaimToken, plan: &FailurePlan) -> QueueResult<bool> {
        let (status, scheduled_for) = match plan.outcome {
            FailureOutcome::Retry { scheduled_for } => (JobStatus::Pending, Some(scheduled_for)),
            FailureOutcome::Dead => (JobStatus::Dead, None),
        };
        let result = sqlx::query(
            "UPDATE porter_jobs \
             SET status = $5, \
                 scheduled_for = COALESCE($6, scheduled_for), \
                 failed_at = CASE WHEN $5 = 'dead' THEN $2 ELSE failed_at END, \
                 last_error = $7, \
                 error_history = error_history || $8::jsonb, \
                 locked_by = NULL, locked_until = NULL, updated_at = $2 \
             WHERE id = $1 AND status = 'processing' AND locked_by = $3 AND attempts = $4",
        )
        .bind(id)
        .bind(plan.entry.timestamp)
        .bind(&token.worker_id)
        .bind(to_i32(token.attempt))
        .bind(status.as_str())
        .bind(scheduled_for)
        .bind(&plan.entry.error)
        .bind(Json(vec![&plan.entry]))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn retry_dead(&self, ids: Option<&[JobId]>, now: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            "UPDATE porter_jobs \
             SET status = 'pending', attempts = 0, scheduled_for = $1, failed_at = NULL, \
                 last_error = NULL, locked_by = NULL, locked_until = NULL, updated_at = $1 \
             WHERE status = 'dead' AND ($2::uuid[] IS NULL OR id = ANY($2))",
        )
        .bind(now)
        .bind(ids.map(|ids| ids.to_vec()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn status(&self, now: DateTime<Utc>, failure_limit: usize) -> QueueResult<QueueStatus> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM porter_jobs GROUP BY status")
                .fetch_all(&mut *tx)
                .await?;
        let mut status_counts = StatusCounts::default();
        for (status, n) in counts {
            status_counts.add(status.parse()?, u64::try_from(n).unwrap_or(0));
        }

        let by_queue: Vec<(String, i64)> = sqlx::query_as(
            "SELECT queue, COUNT(*) FROM porter_jobs WHERE status = 'pending' GROUP BY queue",
        )
        .fetch_all(&mut *tx)
        .await?;
        let pending_by_queue: BTreeMap<String, u64> = by_queue
            .into_iter()
            .map(|(queue, n)| (queue, u64::try_from(n).unwrap_or(0)))
            .collect();

        let oldest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MIN(created_at) FROM porter_jobs WHERE status = 'pending'")
                .fetch_one(&mut *tx)
                .await?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM porter_jobs \
             WHERE last_error IS NOT NULL AND status IN ('pending', 'failed', 'dead') \
             ORDER BY updated_at DESC, id ASC LIMIT $1"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(i64::try_from(failure_limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut recent_failures = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(summary) = FailureSummary::from_job(&Job::try_from(row)?) {
                recent_failures.push(summary);
            }
        }

        Ok(QueueStatus {
            status_counts,
            pending_by_queue,
            oldest_pending_age_secs: oldest.map(|t| (now - t).num_seconds()),
            recent_failures,
            generated_at: now,
        })
    }
}
