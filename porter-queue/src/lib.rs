//! Durable job queue for Porter.
//!
//! Jobs live in a single store (in memory or PostgreSQL) that doubles as the
//! coordination point between workers. A worker claims a job by taking a
//! time-limited lease in one conditional write, runs the registered handler,
//! then commits success or failure. Failures are retried with exponential
//! backoff until `max_attempts`, after which the job is dead-lettered.
//!
//! ## Features
//!
//! - Priorities (critical, high, normal, low) and delayed jobs
//! - Lease-based claiming; expired leases are reclaimed by other workers
//! - Exponential backoff with a cap, full error history per job
//! - Dead-letter revival and queue introspection
//! - Bounded, sequential batch runs for externally triggered workers
//!
//! ## Quick Start
//!
//! ```no_run
//! use porter_queue::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> QueueResult<()> {
//! let queue = Queue::new(Arc::new(MemoryJobStore::new()));
//!
//! queue
//!     .enqueue("send_email", serde_json::json!({"to": "user@example.com"}))
//!     .await?;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("send_email", |job: Job| async move {
//!     println!("sending to {}", job.payload["to"]);
//!     Ok(())
//! });
//!
//! let worker = Worker::new(&queue, Arc::new(registry));
//! let report = BatchRunner::new(worker).run_batch(10, None).await?;
//! println!("processed {}", report.processed_count);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod stats;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use job::{
    ClaimToken, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, ErrorEntry, Job, JobData, JobId, JobPriority,
    JobStatus,
};
pub use queue::{EnqueueOptions, Queue, RetryReport};
pub use registry::{Handler, HandlerRegistry};
pub use retry::{BackoffPolicy, FailureOutcome, FailurePlan};
pub use runner::{BatchReport, BatchRunner};
pub use stats::{FailureSummary, QueueStatus, RECENT_FAILURE_LIMIT, StatusCounts};
#[cfg(feature = "postgres")]
pub use store::PgJobStore;
pub use store::{ClaimRequest, JobStore, MemoryJobStore};
pub use worker::{JobOutcome, Worker, WorkerConfig};

/// Prelude for common imports.
///
/// ```
/// use porter_queue::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{Job, JobData, JobId, JobPriority, JobStatus};
    pub use crate::queue::{EnqueueOptions, Queue};
    pub use crate::registry::{Handler, HandlerRegistry};
    pub use crate::runner::{BatchReport, BatchRunner};
    pub use crate::store::{JobStore, MemoryJobStore};
    pub use crate::worker::{JobOutcome, Worker, WorkerConfig};
}
