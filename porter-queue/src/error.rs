//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Rejected enqueue input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No handler registered for the job type
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// A handler reported failure
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The job store could not complete an operation
    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Shorthand for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        QueueError::Handler(message.into())
    }

    /// Whether this error means the store itself is unusable, as opposed to
    /// a failure of one job.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            QueueError::Store(_) => true,
            #[cfg(feature = "postgres")]
            QueueError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<porter_config::ConfigError> for QueueError {
    fn from(err: porter_config::ConfigError) -> Self {
        QueueError::Config(err.to_string())
    }
}
