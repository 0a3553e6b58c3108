//! Integration tests for porter-webhooks

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use porter_queue::{
    BatchRunner, HandlerRegistry, JobStatus, ManualClock, MemoryJobStore, Queue, Worker,
};
use porter_webhooks::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

struct Harness {
    clock: ManualClock,
    jobs: MemoryJobStore,
    events: MemoryEventStore,
    ingestor: Ingestor,
    runner: BatchRunner,
}

impl Harness {
    fn new(business: Arc<dyn BusinessStore>) -> Self {
        let clock = ManualClock::new(start());
        let jobs = MemoryJobStore::new();
        let events = MemoryEventStore::new();
        let queue = Queue::new(Arc::new(jobs.clone())).with_clock(Arc::new(clock.clone()));

        let router = StripeRouter::new(business, queue.clone());
        let mut registry = HandlerRegistry::new();
        EventProcessor::new(Arc::new(events.clone()), Arc::new(router))
            .with_clock(Arc::new(clock.clone()))
            .register(&mut registry);

        Self {
            ingestor: Ingestor::new(Arc::new(events.clone()), queue.clone()),
            runner: BatchRunner::new(Worker::new(&queue, Arc::new(registry))),
            clock,
            jobs,
            events,
        }
    }

    async fn deliver(&self, external_id: &str, event_type: &str, object: serde_json::Value) -> IngestOutcome {
        self.ingestor
            .ingest(
                STRIPE_SOURCE,
                external_id,
                event_type,
                serde_json::json!({"id": external_id, "type": event_type, "data": {"object": object}}),
            )
            .await
            .unwrap()
    }

    async fn notifications(&self) -> usize {
        self.jobs
            .jobs()
            .await
            .iter()
            .filter(|job| job.job_type == "send_email_notification")
            .count()
    }
}

fn business_with_payment() -> MemoryBusinessStore {
    let business = MemoryBusinessStore::new();
    business.insert_payment(
        PaymentRecord::new("pay_rent_june", 185_000, "usd")
            .with_provider_reference("pi_june")
            .with_payer_email("tenant@example.com"),
    );
    business
}

#[tokio::test]
async fn test_redelivery_after_processing_has_one_side_effect() {
    let business = business_with_payment();
    let harness = Harness::new(Arc::new(business.clone()));

    let first = harness
        .deliver("evt_1", "payment_intent.succeeded", serde_json::json!({"id": "pi_june"}))
        .await;
    assert!(matches!(first, IngestOutcome::Queued { .. }));

    let report = harness.runner.run_batch(10, Some("webhooks")).await.unwrap();
    assert_eq!(report.completed_count(), 1);

    let event = harness.events.get(first.event_id()).await.unwrap().unwrap();
    assert_eq!(event.status, WebhookEventStatus::Processed);
    assert_eq!(event.attempts, 1);

    for _ in 0..2 {
        let again = harness
            .deliver("evt_1", "payment_intent.succeeded", serde_json::json!({"id": "pi_june"}))
            .await;
        assert_eq!(
            again,
            IngestOutcome::Duplicate {
                event_id: first.event_id()
            }
        );
    }
    assert_eq!(
        harness.runner.run_batch(10, Some("webhooks")).await.unwrap().processed_count,
        0
    );

    let payment = business.payment("pay_rent_june").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert_eq!(harness.notifications().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_queue_one_job() {
    let harness = Arc::new(Harness::new(Arc::new(business_with_payment())));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness
                .deliver("evt_race", "payment_intent.succeeded", serde_json::json!({"id": "pi_june"}))
                .await
        }));
    }

    let mut queued = 0;
    for handle in handles {
        if !handle.await.unwrap().is_duplicate() {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);
    assert_eq!(harness.events.len().await, 1);
    assert_eq!(harness.jobs.len().await, 1);
}

/// Business store whose payment lookups fail a fixed number of times.
struct Flaky {
    inner: MemoryBusinessStore,
    failures: AtomicUsize,
}

#[async_trait]
impl BusinessStore for Flaky {
    async fn payment(&self, id: &str) -> Result<Option<PaymentRecord>> {
        self.inner.payment(id).await
    }

    async fn payment_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(WebhookError::Business("connection reset".into()));
        }
        self.inner.payment_by_provider_reference(reference).await
    }

    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()> {
        self.inner.save_payment(payment).await
    }

    async fn connected_account(&self, id: &str) -> Result<Option<ConnectedAccount>> {
        self.inner.connected_account(id).await
    }

    async fn save_connected_account(&self, account: &ConnectedAccount) -> Result<()> {
        self.inner.save_connected_account(account).await
    }

    async fn subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>> {
        self.inner.subscription(id).await
    }

    async fn save_subscription(&self, subscription: &SubscriptionRecord) -> Result<()> {
        self.inner.save_subscription(subscription).await
    }

    async fn invoice(&self, id: &str) -> Result<Option<InvoiceRecord>> {
        self.inner.invoice(id).await
    }

    async fn save_invoice(&self, invoice: &InvoiceRecord) -> Result<()> {
        self.inner.save_invoice(invoice).await
    }
}

#[tokio::test]
async fn test_processing_failure_retries_through_the_job() {
    let business = business_with_payment();
    let harness = Harness::new(Arc::new(Flaky {
        inner: business.clone(),
        failures: AtomicUsize::new(1),
    }));

    let outcome = harness
        .deliver("evt_flaky", "payment_intent.succeeded", serde_json::json!({"id": "pi_june"}))
        .await;

    let report = harness.runner.run_batch(10, Some("webhooks")).await.unwrap();
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.dead_count(), 0);

    let event = harness.events.get(outcome.event_id()).await.unwrap().unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert!(event.error_message.unwrap().contains("connection reset"));

    let IngestOutcome::Queued { job_id, .. } = outcome else {
        panic!("expected queued");
    };
    let job = harness.jobs.jobs().await.into_iter().find(|j| j.id == job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.scheduled_for, start() + Duration::minutes(2));

    harness.clock.advance(Duration::minutes(2));
    let report = harness.runner.run_batch(10, Some("webhooks")).await.unwrap();
    assert_eq!(report.completed_count(), 1);

    let event = harness.events.get(outcome.event_id()).await.unwrap().unwrap();
    assert_eq!(event.status, WebhookEventStatus::Processed);
    assert_eq!(event.attempts, 2);
    assert_eq!(event.processed_at, Some(start() + Duration::minutes(2)));
    assert_eq!(harness.notifications().await, 1);
}

#[tokio::test]
async fn test_redelivery_revives_event_after_dead_job() {
    let harness = Harness::new(Arc::new(MemoryBusinessStore::new()));

    // no data.object: every attempt fails
    let outcome = harness
        .ingestor
        .ingest(
            STRIPE_SOURCE,
            "evt_broken",
            "charge.refunded",
            serde_json::json!({"id": "evt_broken"}),
        )
        .await
        .unwrap();

    for delay in [0, 2, 4] {
        harness.clock.advance(Duration::minutes(delay));
        harness.runner.run_batch(10, Some("webhooks")).await.unwrap();
    }
    let dead = harness.jobs.jobs().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].status, JobStatus::Dead);

    let event = harness.events.get(outcome.event_id()).await.unwrap().unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert_eq!(event.attempts, 3);

    let revived = harness
        .ingestor
        .ingest(
            STRIPE_SOURCE,
            "evt_broken",
            "charge.refunded",
            serde_json::json!({"id": "evt_broken"}),
        )
        .await
        .unwrap();
    assert!(matches!(revived, IngestOutcome::Queued { .. }));
    assert_eq!(revived.event_id(), outcome.event_id());
    assert_eq!(harness.jobs.len().await, 2);
}

#[tokio::test]
async fn test_unknown_event_types_are_processed() {
    let harness = Harness::new(Arc::new(MemoryBusinessStore::new()));
    let outcome = harness
        .deliver("evt_payout", "payout.paid", serde_json::json!({"id": "po_1"}))
        .await;

    let report = harness.runner.run_batch(10, None).await.unwrap();
    assert_eq!(report.completed_count(), 1);
    let event = harness.events.get(outcome.event_id()).await.unwrap().unwrap();
    assert!(event.is_processed());
}

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn test_pg_dedup_constraint() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let settings = porter_config::DatabaseSettings {
            url: Some(url),
            max_connections: 5,
        };
        let events = PgEventStore::connect(&settings).await.unwrap();
        events.migrate().await.unwrap();

        let external_id = format!("evt_{}", uuid::Uuid::new_v4());
        let event = WebhookEvent::new(STRIPE_SOURCE, external_id.clone(), "invoice.paid", serde_json::json!({}), Utc::now());
        let (_, created) = events.insert_if_absent(&event).await.unwrap();
        assert!(created);

        let racing = WebhookEvent::new(STRIPE_SOURCE, external_id, "invoice.paid", serde_json::json!({}), Utc::now());
        let (stored, created) = events.insert_if_absent(&racing).await.unwrap();
        assert!(!created);
        assert_eq!(stored.id, event.id);

        let started = events.begin_attempt(event.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(started.status, WebhookEventStatus::Processing);
        assert!(events.mark_processed(event.id, Utc::now()).await.unwrap());
        assert!(events.begin_attempt(event.id, Utc::now()).await.unwrap().is_none());
    }
}
