//! Persisted webhook events.

use crate::error::WebhookError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Event identifier
pub type EventId = Uuid;

/// Processing status of a webhook event.
///
/// Independent from the status of the job that processes it: the job
/// governs retries, the event governs idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Received,
    Processing,
    /// Permanent idempotency marker
    Processed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventStatus::Received => "received",
            WebhookEventStatus::Processing => "processing",
            WebhookEventStatus::Processed => "processed",
            WebhookEventStatus::Failed => "failed",
        }
    }

    /// Whether a processing job for this event is still expected to run.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            WebhookEventStatus::Received | WebhookEventStatus::Processing
        )
    }
}

impl fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEventStatus {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(WebhookEventStatus::Received),
            "processing" => Ok(WebhookEventStatus::Processing),
            "processed" => Ok(WebhookEventStatus::Processed),
            "failed" => Ok(WebhookEventStatus::Failed),
            other => Err(WebhookError::Store(format!(
                "unknown webhook event status '{}'",
                other
            ))),
        }
    }
}

/// One inbound notification from an external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,

    /// Provider name, e.g. "stripe"
    pub source: String,

    /// Provider's id for the event; unique per source
    pub external_event_id: String,

    pub event_type: String,

    /// Full event body as delivered
    pub payload: Value,

    pub status: WebhookEventStatus,

    /// Processing attempts so far
    pub attempts: u32,

    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl WebhookEvent {
    pub fn new(
        source: impl Into<String>,
        external_event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            external_event_id: external_event_id.into(),
            event_type: event_type.into(),
            payload,
            status: WebhookEventStatus::Received,
            attempts: 0,
            received_at: now,
            processed_at: None,
            last_attempt_at: None,
            error_message: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == WebhookEventStatus::Processed
    }

    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = WebhookEventStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = WebhookEventStatus::Processed;
        self.processed_at = Some(now);
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = WebhookEventStatus::Failed;
        self.error_message = Some(error.into());
    }
}

/// Job type that processes events from `source`.
pub fn processing_job_type(source: &str) -> String {
    format!("process_{}_webhook", source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> WebhookEvent {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        WebhookEvent::new(
            "stripe",
            "evt_1",
            "invoice.paid",
            serde_json::json!({}),
            now,
        )
    }

    #[test]
    fn test_new_event_is_received() {
        let event = event();
        assert_eq!(event.status, WebhookEventStatus::Received);
        assert_eq!(event.attempts, 0);
        assert!(event.status.is_in_flight());
        assert!(!event.is_processed());
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut event = event();
        let later = event.received_at + chrono::Duration::seconds(5);

        event.begin_attempt(later);
        assert_eq!(event.status, WebhookEventStatus::Processing);
        assert_eq!(event.attempts, 1);
        assert_eq!(event.last_attempt_at, Some(later));

        event.mark_failed("business store unavailable");
        assert_eq!(event.status, WebhookEventStatus::Failed);
        assert!(!event.status.is_in_flight());

        event.begin_attempt(later);
        event.mark_processed(later);
        assert_eq!(event.attempts, 2);
        assert_eq!(event.processed_at, Some(later));
        assert!(event.error_message.is_none());
    }

    #[test]
    fn test_status_parse() {
        for status in [
            WebhookEventStatus::Received,
            WebhookEventStatus::Processing,
            WebhookEventStatus::Processed,
            WebhookEventStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<WebhookEventStatus>().unwrap(), status);
        }
        assert!("done".parse::<WebhookEventStatus>().is_err());
    }

    #[test]
    fn test_processing_job_type() {
        assert_eq!(processing_job_type("stripe"), "process_stripe_webhook");
    }
}
