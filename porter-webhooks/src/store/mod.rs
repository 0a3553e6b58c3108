//! Webhook event persistence.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PgEventStore;

use crate::error::Result;
use crate::event::{EventId, WebhookEvent, WebhookEventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage for webhook events.
///
/// `(source, external_event_id)` is unique. Every state change is a single
/// conditional write so concurrent deliveries and job runs cannot interleave
/// a read with a stale write.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert unless an event with the same source and external id exists.
    /// Returns the stored event and whether it was created.
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<(WebhookEvent, bool)>;

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>>;

    async fn find(&self, source: &str, external_event_id: &str) -> Result<Option<WebhookEvent>>;

    /// Events in `status`, or all of them, oldest first.
    async fn list(&self, status: Option<WebhookEventStatus>) -> Result<Vec<WebhookEvent>>;

    /// Move to processing, bump attempts and stamp `last_attempt_at`.
    ///
    /// `None` if the event is missing or already processed.
    async fn begin_attempt(&self, id: EventId, now: DateTime<Utc>)
    -> Result<Option<WebhookEvent>>;

    async fn mark_processed(&self, id: EventId, now: DateTime<Utc>) -> Result<bool>;

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<bool>;

    /// Move a failed event back to received. `false` unless it was failed.
    async fn reset_failed(&self, id: EventId) -> Result<bool>;
}
