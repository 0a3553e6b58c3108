//! Recurring task scheduling for Porter.
//!
//! Tasks are persisted definitions ("enqueue `send_rent_reminders` every day
//! at 09:00 UTC"). Each [`Scheduler::tick`] enqueues a job on the Porter queue
//! for every due task and advances its next run, even when the enqueue
//! fails, so one bad tick never stalls a schedule.
//!
//! ## Schedules
//!
//! ```
//! use porter_cron::Schedule;
//! use chrono::{TimeZone, Utc};
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap();
//!
//! // daily at 09:00: already past today, so tomorrow
//! let next = Schedule::daily(9, 0).next_after(now).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 21, 9, 0, 0).unwrap());
//!
//! // the 31st clamps to the end of shorter months
//! let next = Schedule::monthly(31, 0, 0).next_after(now).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use porter_cron::*;
//! use porter_queue::{MemoryJobStore, Queue};
//! use std::sync::Arc;
//!
//! # async fn example() -> CronResult<()> {
//! let queue = Queue::new(Arc::new(MemoryJobStore::new()));
//! let scheduler = Scheduler::new(Arc::new(MemoryTaskStore::new()), queue);
//!
//! scheduler
//!     .ensure_task(ScheduledTask::new(
//!         "lease_expiry_digest",
//!         "send_lease_expiry_digest",
//!         Schedule::weekly(1, 8, 0),
//!         serde_json::json!({"window_days": 30}),
//!     ))
//!     .await?;
//!
//! let report = scheduler.tick(chrono::Utc::now()).await?;
//! println!("enqueued {} tasks", report.processed_tasks);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod expression;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod task;

pub use error::{CronError, CronResult};
pub use expression::CronExpression;
pub use schedule::Schedule;
pub use scheduler::{Scheduler, SchedulerConfig, TaskRunResult, TickReport};
pub use store::{MemoryTaskStore, TaskStore};
#[cfg(feature = "postgres")]
pub use store::PgTaskStore;
pub use task::{DueTask, RunStatus, ScheduledTask, TaskRun};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CronError, CronResult};
    pub use crate::schedule::Schedule;
    pub use crate::scheduler::{Scheduler, SchedulerConfig, TickReport};
    pub use crate::store::{MemoryTaskStore, TaskStore};
    pub use crate::task::{RunStatus, ScheduledTask};
}
