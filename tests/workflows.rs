//! End-to-end workflows across the scheduler, webhook ingestion and the
//! worker that drains both.

#![cfg(all(feature = "config", feature = "cron", feature = "webhooks"))]

use chrono::{Duration, TimeZone, Utc};
use porter::porter_config::PorterConfig;
use porter::porter_cron::{MemoryTaskStore, Schedule, ScheduledTask, Scheduler, SchedulerConfig};
use porter::porter_queue::*;
use porter::porter_webhooks::{
    BusinessStore, EventProcessor, IngestConfig, Ingestor, MemoryBusinessStore, MemoryEventStore, PaymentRecord,
    PaymentStatus, StripeConfig, StripeRouter,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test]
async fn test_scheduled_and_webhook_jobs_share_one_runner() {
    let config = PorterConfig::default();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 8, 1, 7, 0, 0).unwrap());
    let jobs = MemoryJobStore::new();
    let queue = Queue::from_settings(Arc::new(jobs.clone()), &config.worker)
        .with_clock(Arc::new(clock.clone()));

    // producers
    let scheduler = Scheduler::with_config(
        Arc::new(MemoryTaskStore::new()),
        queue.clone(),
        SchedulerConfig::from_settings(&config.scheduler),
    );
    scheduler
        .ensure_task(ScheduledTask::new(
            "overdue_invoices",
            "check_overdue_invoices",
            Schedule::daily(8, 0),
            serde_json::json!({"grace_days": 5}),
        ))
        .await
        .unwrap();

    let events = Arc::new(MemoryEventStore::new());
    let business = MemoryBusinessStore::new();
    business.insert_payment(PaymentRecord::new("pay_1", 120_000, "usd").with_provider_reference("pi_1"));
    let ingestor = Ingestor::with_config(
        events.clone(),
        queue.clone(),
        IngestConfig::from_settings(&config.webhooks),
    );

    // consumers
    let checks = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let counter = checks.clone();
    registry.register_fn("check_overdue_invoices", move |_job: Job| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), QueueError>(())
        }
    });
    registry.register_fn("send_email_notification", |_job: Job| async {
        Ok::<(), QueueError>(())
    });
    let router = StripeRouter::with_config(
        Arc::new(business.clone()),
        queue.clone(),
        StripeConfig::from_settings(&config.webhooks),
    );
    EventProcessor::new(events, Arc::new(router))
        .with_clock(Arc::new(clock.clone()))
        .register(&mut registry);

    let worker = Worker::with_config(
        &queue,
        Arc::new(registry),
        WorkerConfig::from_settings(&config.worker, &config.retry).with_worker_id("e2e"),
    );
    let runner = BatchRunner::from_settings(worker, &config.worker);

    scheduler.tick(clock.now()).await.unwrap();
    ingestor
        .ingest(
            "stripe",
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({"data": {"object": {"id": "pi_1"}}}),
        )
        .await
        .unwrap();

    // webhook job is high priority, so it runs first and queues the receipt
    let report = runner.run_default(None).await.unwrap();
    assert_eq!(report.processed_count, 3);
    assert_eq!(report.completed_count(), 3);
    assert_eq!(
        report.results[0].job_id(),
        jobs.jobs()
            .await
            .iter()
            .find(|j| j.job_type == "process_stripe_webhook")
            .unwrap()
            .id
    );
    assert_eq!(checks.load(Ordering::SeqCst), 1);
    assert_eq!(
        business.payment("pay_1").await.unwrap().unwrap().status,
        PaymentStatus::Succeeded
    );

    let status = queue.status().await.unwrap();
    assert_eq!(status.status_counts.completed, 3);
    assert_eq!(status.status_counts.pending, 0);
    assert!(status.oldest_pending_age_secs.is_none());

    // the 08:00 run is not due yet
    clock.advance(Duration::minutes(30));
    assert_eq!(scheduler.tick(clock.now()).await.unwrap().processed_tasks, 0);
}
