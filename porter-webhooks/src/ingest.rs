//! Idempotent webhook ingestion.

use crate::error::{Result, WebhookError};
use crate::event::{EventId, WebhookEvent, WebhookEventStatus, processing_job_type};
use crate::store::EventStore;
use porter_config::WebhookSettings;
use porter_log::{debug, info, warn};
use porter_queue::{EnqueueOptions, JobId, JobPriority, Queue};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Queue processing jobs are placed on
    pub queue: String,

    pub priority: JobPriority,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue: "webhooks".to_string(),
            priority: JobPriority::High,
        }
    }
}

impl IngestConfig {
    pub fn from_settings(settings: &WebhookSettings) -> Self {
        Self {
            queue: settings.queue.clone(),
            ..Self::default()
        }
    }
}

/// Result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A processing job was enqueued
    Queued { event_id: EventId, job_id: JobId },
    /// Already processed or already in flight; nothing was done
    Duplicate { event_id: EventId },
}

impl IngestOutcome {
    pub fn event_id(&self) -> EventId {
        match self {
            IngestOutcome::Queued { event_id, .. } | IngestOutcome::Duplicate { event_id } => {
                *event_id
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

/// Persists verified deliveries and hands them to the queue.
///
/// Signature verification happens before `ingest` is called.
#[derive(Clone)]
pub struct Ingestor {
    events: Arc<dyn EventStore>,
    queue: Queue,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(events: Arc<dyn EventStore>, queue: Queue) -> Self {
        Self::with_config(events, queue, IngestConfig::default())
    }

    pub fn with_config(events: Arc<dyn EventStore>, queue: Queue, config: IngestConfig) -> Self {
        Self {
            events,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Record a delivery and enqueue its processing job.
    ///
    /// Redelivery of a processed or in-flight event is a duplicate. A failed
    /// event is revived and queued again.
    pub async fn ingest(
        &self,
        source: &str,
        external_event_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<IngestOutcome> {
        for (field, value) in [
            ("source", source),
            ("external_event_id", external_event_id),
            ("event_type", event_type),
        ] {
            if value.trim().is_empty() {
                return Err(WebhookError::Validation(format!("{} is required", field)));
            }
        }

        let candidate = WebhookEvent::new(
            source,
            external_event_id,
            event_type,
            payload,
            self.queue.now(),
        );
        let (event, created) = self.events.insert_if_absent(&candidate).await?;

        if created {
            return match self.enqueue(&event).await {
                Ok(job_id) => {
                    info!(
                        "Webhook queued";
                        source = source,
                        event_type = event_type,
                        event_id = event.id,
                        job_id = job_id
                    );
                    Ok(IngestOutcome::Queued {
                        event_id: event.id,
                        job_id,
                    })
                }
                Err(err) => {
                    // leave it revivable by the provider's next delivery
                    self.record_enqueue_failure(event.id, &err).await;
                    Err(err)
                }
            };
        }

        self.redeliver(event).await
    }

    async fn redeliver(&self, event: WebhookEvent) -> Result<IngestOutcome> {
        let duplicate = IngestOutcome::Duplicate { event_id: event.id };

        if event.status != WebhookEventStatus::Failed {
            debug!(
                "Duplicate webhook delivery";
                source = event.source,
                external_event_id = event.external_event_id,
                status = event.status
            );
            return Ok(duplicate);
        }

        // another delivery may have revived it first
        if !self.events.reset_failed(event.id).await? {
            return Ok(duplicate);
        }

        match self.enqueue(&event).await {
            Ok(job_id) => {
                info!(
                    "Failed webhook requeued on redelivery";
                    source = event.source,
                    event_id = event.id,
                    attempts = event.attempts,
                    job_id = job_id
                );
                Ok(IngestOutcome::Queued {
                    event_id: event.id,
                    job_id,
                })
            }
            Err(err) => {
                warn!("Webhook requeue failed"; event_id = event.id, error = err);
                self.record_enqueue_failure(event.id, &err).await;
                Err(err)
            }
        }
    }

    /// The enqueue error is what the caller sees; a store error here is only logged.
    async fn record_enqueue_failure(&self, event_id: EventId, err: &WebhookError) {
        if let Err(store_err) = self.events.mark_failed(event_id, &err.to_string()).await {
            warn!(
                "Could not record webhook enqueue failure";
                event_id = event_id,
                error = store_err
            );
        }
    }

    async fn enqueue(&self, event: &WebhookEvent) -> Result<JobId> {
        let options = EnqueueOptions::new()
            .on_queue(self.config.queue.clone())
            .with_priority(self.config.priority);
        let job_id = self
            .queue
            .enqueue_with(
                processing_job_type(&event.source),
                serde_json::json!({ "webhook_event_id": event.id }),
                options,
            )
            .await?;
        Ok(job_id)
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
