//! Idempotent webhook ingestion for Porter.
//!
//! Verified deliveries are persisted as [`WebhookEvent`]s, deduplicated by
//! `(source, external_event_id)`, and processed asynchronously by a
//! `process_<source>_webhook` job on the Porter queue. A processed event is
//! a permanent idempotency marker: redelivering it does nothing.
//!
//! ## Wiring
//!
//! ```no_run
//! use porter_queue::{BatchRunner, HandlerRegistry, MemoryJobStore, Queue, Worker};
//! use porter_webhooks::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let queue = Queue::new(Arc::new(MemoryJobStore::new()));
//! let events: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
//! let business = Arc::new(MemoryBusinessStore::new());
//!
//! let ingestor = Ingestor::new(events.clone(), queue.clone());
//! let router = StripeRouter::new(business, queue.clone());
//!
//! let mut registry = HandlerRegistry::new();
//! EventProcessor::new(events, Arc::new(router)).register(&mut registry);
//!
//! // at the HTTP boundary, after signature verification
//! let outcome = ingestor
//!     .ingest(
//!         "stripe",
//!         "evt_1OaB2c",
//!         "invoice.paid",
//!         serde_json::json!({"data": {"object": {}}}),
//!     )
//!     .await?;
//! assert!(!outcome.is_duplicate());
//!
//! // later, from whatever drives the workers
//! let runner = BatchRunner::new(Worker::new(&queue, Arc::new(registry)));
//! runner.run_batch(10, Some("webhooks")).await?;
//! # Ok(())
//! # }
//! ```

pub mod business;
pub mod error;
pub mod event;
pub mod ingest;
pub mod processor;
pub mod store;
pub mod stripe;

pub use business::{
    BusinessStore, ConnectedAccount, InvoiceRecord, MemoryBusinessStore, PaymentRecord,
    PaymentStatus, SubscriptionRecord,
};
pub use error::{Result, WebhookError};
pub use event::{EventId, WebhookEvent, WebhookEventStatus, processing_job_type};
pub use ingest::{IngestConfig, IngestOutcome, Ingestor};
pub use processor::{EventProcessor, EventRouter, ProcessOutcome, event_id_from_job};
#[cfg(feature = "postgres")]
pub use store::PgEventStore;
pub use store::{EventStore, MemoryEventStore};
pub use stripe::{STRIPE_SOURCE, StripeConfig, StripeEventType, StripeRouter};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::business::{BusinessStore, MemoryBusinessStore};
    pub use crate::error::{Result, WebhookError};
    pub use crate::event::{WebhookEvent, WebhookEventStatus};
    pub use crate::ingest::{IngestOutcome, Ingestor};
    pub use crate::processor::{EventProcessor, EventRouter};
    pub use crate::store::{EventStore, MemoryEventStore};
    pub use crate::stripe::StripeRouter;
}
