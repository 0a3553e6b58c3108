//! Error types for scheduler operations.

use porter_queue::QueueError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type CronResult<T> = Result<T, CronError>;

/// Scheduler-specific errors.
#[derive(Debug, Error)]
pub enum CronError {
    /// Schedule parameters out of range or unparseable
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Enqueueing the task's job failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CronError {
    fn from(err: serde_json::Error) -> Self {
        CronError::Serialization(err.to_string())
    }
}
