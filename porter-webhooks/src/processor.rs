//! Webhook event processing job handler.

use crate::error::{Result, WebhookError};
use crate::event::{EventId, WebhookEvent, processing_job_type};
use crate::store::EventStore;
use async_trait::async_trait;
use porter_log::{debug, info, warn};
use porter_queue::{Handler, HandlerRegistry, Job, QueueResult, SharedClock, SystemClock};
use std::sync::Arc;

/// Business logic for one provider's events.
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Provider name the router handles, e.g. "stripe"
    fn source(&self) -> &str;

    /// Apply one event. Must be idempotent: at-least-once delivery means the
    /// same event can be routed more than once.
    async fn route(&self, event: &WebhookEvent) -> Result<()>;
}

/// What a processing run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    /// The event was already processed; nothing ran
    AlreadyProcessed,
}

/// Handler for `process_<source>_webhook` jobs.
///
/// Mirrors the outcome onto the event: processed on success, failed with
/// the error message otherwise. Errors are returned so the job retries.
#[derive(Clone)]
pub struct EventProcessor {
    events: Arc<dyn EventStore>,
    router: Arc<dyn EventRouter>,
    clock: SharedClock,
}

impl EventProcessor {
    pub fn new(events: Arc<dyn EventStore>, router: Arc<dyn EventRouter>) -> Self {
        Self {
            events,
            router,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Job type this processor handles.
    pub fn job_type(&self) -> String {
        processing_job_type(self.router.source())
    }

    /// Register under [`job_type`](Self::job_type).
    pub fn register(self, registry: &mut HandlerRegistry) -> &mut HandlerRegistry {
        let job_type = self.job_type();
        registry.register(job_type, self)
    }

    pub async fn process(&self, event_id: EventId) -> Result<ProcessOutcome> {
        let Some(event) = self.events.begin_attempt(event_id, self.clock.now()).await? else {
            return match self.events.get(event_id).await? {
                Some(_) => {
                    debug!("Webhook event already processed"; event_id = event_id);
                    Ok(ProcessOutcome::AlreadyProcessed)
                }
                None => Err(WebhookError::EventNotFound(event_id.to_string())),
            };
        };

        match self.router.route(&event).await {
            Ok(()) => {
                self.events
                    .mark_processed(event_id, self.clock.now())
                    .await?;
                info!(
                    "Webhook event processed";
                    source = event.source,
                    event_type = event.event_type,
                    event_id = event_id,
                    attempt = event.attempts
                );
                Ok(ProcessOutcome::Processed)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(store_err) = self.events.mark_failed(event_id, &message).await {
                    warn!(
                        "Could not record webhook failure";
                        event_id = event_id,
                        error = store_err
                    );
                }
                warn!(
                    "Webhook event failed";
                    source = event.source,
                    event_type = event.event_type,
                    event_id = event_id,
                    attempt = event.attempts,
                    error = message
                );
                Err(err)
            }
        }
    }
}

/// Event id carried by a processing job.
pub fn event_id_from_job(job: &Job) -> Result<EventId> {
    let raw = job
        .payload
        .get("webhook_event_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WebhookError::payload("job payload has no webhook_event_id"))?;
    raw.parse()
        .map_err(|_| WebhookError::payload(format!("invalid webhook_event_id '{}'", raw)))
}

#[async_trait]
impl Handler for EventProcessor {
    async fn handle(&self, job: &Job) -> QueueResult<()> {
        let event_id = event_id_from_job(job)?;
        self.process(event_id).await?;
        Ok(())
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("source", &self.router.source())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
