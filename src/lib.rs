// Porter - durable background work over a shared store
//
// Jobs are leased by stateless workers, recurring tasks are turned into jobs
// on each scheduler tick, and verified webhook deliveries are deduplicated
// before being handed to the queue.

// Logging is always available
pub use porter_log;

// Re-export optional crates
#[cfg(feature = "config")]
pub use porter_config;

#[cfg(feature = "queue")]
pub use porter_queue;

#[cfg(feature = "cron")]
pub use porter_cron;

#[cfg(feature = "webhooks")]
pub use porter_webhooks;

// Prelude for common imports
pub mod prelude {
    #[cfg(feature = "config")]
    pub use porter_config::PorterConfig;

    #[cfg(feature = "queue")]
    pub use porter_queue::prelude::*;

    #[cfg(feature = "cron")]
    pub use porter_cron::{Schedule, ScheduledTask, Scheduler, TaskStore, TickReport};

    #[cfg(feature = "webhooks")]
    pub use porter_webhooks::{
        BusinessStore, EventProcessor, EventStore, IngestOutcome, Ingestor, StripeRouter,
        WebhookEvent, WebhookEventStatus,
    };
}
