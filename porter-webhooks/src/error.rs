//! Error types for webhook ingestion and processing.

use porter_queue::QueueError;
use thiserror::Error;

/// Result type for webhook operations.
pub type Result<T> = std::result::Result<T, WebhookError>;

/// Webhook-related errors.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Rejected ingest input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Webhook event not found: {0}")]
    EventNotFound(String),

    /// Event payload did not have the expected shape
    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The event store could not complete an operation
    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The business-record store could not complete an operation
    #[error("Business store error: {0}")]
    Business(String),
}

impl WebhookError {
    pub fn payload(message: impl Into<String>) -> Self {
        WebhookError::Payload(message.into())
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Payload(err.to_string())
    }
}

/// Processing failures surface to the worker as handler errors so the
/// owning job retries with backoff.
impl From<WebhookError> for QueueError {
    fn from(err: WebhookError) -> Self {
        QueueError::Handler(err.to_string())
    }
}
