//! PostgreSQL event store.

use super::EventStore;
use crate::error::{Result, WebhookError};
use crate::event::{EventId, WebhookEvent, WebhookEventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use porter_config::DatabaseSettings;
use porter_log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};

const MIGRATION: &str = include_str!("../../migrations/0001_porter_webhook_events.sql");

const EVENT_COLUMNS: &str = "id, source, external_event_id, event_type, payload, status, \
    attempts, received_at, processed_at, last_attempt_at, error_message";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: EventId,
    source: String,
    external_event_id: String,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl TryFrom<EventRow> for WebhookEvent {
    type Error = WebhookError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(WebhookEvent {
            id: row.id,
            status: row.status.parse()?,
            source: row.source,
            external_event_id: row.external_event_id,
            event_type: row.event_type,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            received_at: row.received_at,
            processed_at: row.processed_at,
            last_attempt_at: row.last_attempt_at,
            error_message: row.error_message,
        })
    }
}

/// Events in the `porter_webhook_events` table.
///
/// Dedup relies on the table's unique `(source, external_event_id)`
/// constraint.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| WebhookError::Store("database.url is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        info!("Event store schema ready"; table = "porter_webhook_events");
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<(WebhookEvent, bool)> {
        let sql = format!(
            "INSERT INTO porter_webhook_events ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (source, external_event_id) DO NOTHING"
        );
        let inserted = sqlx::query(&sql)
            .bind(event.id)
            .bind(&event.source)
            .bind(&event.external_event_id)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.status.as_str())
            .bind(i32::try_from(event.attempts).unwrap_or(i32::MAX))
            .bind(event.received_at)
            .bind(event.processed_at)
            .bind(event.last_attempt_at)
            .bind(&event.error_message)
            .execute(&self.pool)
            .await?
            .rows_affected()
            == 1;

        let stored = self
            .find(&event.source, &event.external_event_id)
            .await?
            .ok_or_else(|| WebhookError::EventNotFound(event.external_event_id.clone()))?;
        Ok((stored, inserted))
    }

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM porter_webhook_events WHERE id = $1");
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WebhookEvent::try_from).transpose()
    }

    async fn find(&self, source: &str, external_event_id: &str) -> Result<Option<WebhookEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM porter_webhook_events \
             WHERE source = $1 AND external_event_id = $2"
        );
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(source)
            .bind(external_event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WebhookEvent::try_from).transpose()
    }

    async fn list(&self, status: Option<WebhookEventStatus>) -> Result<Vec<WebhookEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM porter_webhook_events \
             WHERE $1::text IS NULL OR status = $1 \
             ORDER BY received_at, id"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(status.map(WebhookEventStatus::as_str))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(WebhookEvent::try_from)
            .collect()
    }

    async fn begin_attempt(
        &self,
        id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>> {
        let sql = format!(
            "UPDATE porter_webhook_events \
             SET status = 'processing', attempts = attempts + 1, last_attempt_at = $2 \
             WHERE id = $1 AND status <> 'processed' \
             RETURNING {EVENT_COLUMNS}"
        );
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WebhookEvent::try_from).transpose()
    }

    async fn mark_processed(&self, id: EventId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE porter_webhook_events \
             SET status = 'processed', processed_at = $2, error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE porter_webhook_events SET status = 'failed', error_message = $2 \
             WHERE id = $1 AND status <> 'processed'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_failed(&self, id: EventId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE porter_webhook_events SET status = 'received', error_message = NULL \
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
