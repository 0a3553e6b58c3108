//! Stripe event routing.
//!
//! Each sub-handler reads and writes business records through a
//! [`BusinessStore`]. Records may not exist yet when an event races their
//! creation; that is logged and treated as handled.

use crate::business::{
    BusinessStore, ConnectedAccount, InvoiceRecord, PaymentRecord, PaymentStatus,
    SubscriptionRecord,
};
use crate::error::{Result, WebhookError};
use crate::event::WebhookEvent;
use crate::processor::EventRouter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use porter_config::WebhookSettings;
use porter_log::{debug, info, warn};
use porter_queue::{EnqueueOptions, JobId, Queue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Source name for Stripe deliveries.
pub const STRIPE_SOURCE: &str = "stripe";

/// Stripe event types with a sub-handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEventType {
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    ChargeRefunded,
    AccountUpdated,
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    Unknown(String),
}

impl StripeEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentFailed,
            "charge.refunded" => Self::ChargeRefunded,
            "account.updated" => Self::AccountUpdated,
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" => Self::InvoicePaid,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    #[serde(default)]
    receipt_email: Option<String>,
    #[serde(default)]
    last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorObject {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    amount: i64,
    amount_refunded: i64,
}

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    payment_status: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    canceled_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    customer: String,
    #[serde(default)]
    subscription: Option<String>,
    amount_paid: i64,
    currency: String,
}

/// `data.object` of a Stripe event.
fn object<T: DeserializeOwned>(event: &WebhookEvent) -> Result<T> {
    let object = event
        .payload
        .pointer("/data/object")
        .cloned()
        .ok_or_else(|| {
            WebhookError::payload(format!("{} event has no data.object", event.event_type))
        })?;
    Ok(serde_json::from_value(object)?)
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn missing(kind: &str, key: &str) {
    warn!("Stripe event references unknown record"; record = kind, key = key);
}

/// Stripe routing configuration.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Queue for payment notifications
    pub notifications_queue: String,

    pub notification_job_type: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            notifications_queue: "notifications".to_string(),
            notification_job_type: "send_email_notification".to_string(),
        }
    }
}

impl StripeConfig {
    pub fn from_settings(settings: &WebhookSettings) -> Self {
        Self {
            notifications_queue: settings.notifications_queue.clone(),
            ..Self::default()
        }
    }
}

/// Routes Stripe events to payment, account, subscription and invoice
/// updates.
#[derive(Clone)]
pub struct StripeRouter {
    business: Arc<dyn BusinessStore>,
    queue: Queue,
    config: StripeConfig,
}

impl StripeRouter {
    pub fn new(business: Arc<dyn BusinessStore>, queue: Queue) -> Self {
        Self::with_config(business, queue, StripeConfig::default())
    }

    pub fn with_config(business: Arc<dyn BusinessStore>, queue: Queue, config: StripeConfig) -> Self {
        Self {
            business,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    async fn notify(
        &self,
        payment: &PaymentRecord,
        template: &str,
        reason: Option<&str>,
    ) -> Result<JobId> {
        let payload = serde_json::json!({
            "template": template,
            "payment_id": payment.id,
            "recipient": payment.payer_email,
            "amount": payment.amount,
            "currency": payment.currency,
            "reason": reason,
        });
        let job_id = self
            .queue
            .enqueue_with(
                self.config.notification_job_type.clone(),
                payload,
                EnqueueOptions::new().on_queue(self.config.notifications_queue.clone()),
            )
            .await?;
        debug!(
            "Payment notification queued";
            payment_id = payment.id,
            template = template,
            job_id = job_id
        );
        Ok(job_id)
    }

    async fn payment_succeeded(&self, intent: PaymentIntentObject) -> Result<()> {
        let Some(mut payment) = self.business.payment_by_provider_reference(&intent.id).await?
        else {
            missing("payment", &intent.id);
            return Ok(());
        };
        if payment.status == PaymentStatus::Succeeded {
            debug!("Payment already succeeded"; payment_id = payment.id);
            return Ok(());
        }

        let now = self.queue.now();
        payment.status = PaymentStatus::Succeeded;
        payment.paid_at = Some(now);
        payment.failure_reason = None;
        payment.updated_at = now;
        if payment.payer_email.is_none() {
            payment.payer_email = intent.receipt_email;
        }

        // queued before the save so a failed save retries the notification too
        self.notify(&payment, "payment_receipt", None).await?;
        self.business.save_payment(&payment).await?;
        info!("Payment succeeded"; payment_id = payment.id, reference = intent.id);
        Ok(())
    }

    async fn payment_failed(&self, intent: PaymentIntentObject) -> Result<()> {
        let Some(mut payment) = self.business.payment_by_provider_reference(&intent.id).await?
        else {
            missing("payment", &intent.id);
            return Ok(());
        };
        if matches!(
            payment.status,
            PaymentStatus::Succeeded | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        ) {
            debug!(
                "Ignoring failure for settled payment";
                payment_id = payment.id,
                status = format!("{:?}", payment.status)
            );
            return Ok(());
        }

        let reason = intent
            .last_payment_error
            .and_then(|e| e.message.or(e.code))
            .unwrap_or_else(|| "payment failed".to_string());
        let first_failure = payment.status != PaymentStatus::Failed;

        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.clone());
        payment.updated_at = self.queue.now();
        if payment.payer_email.is_none() {
            payment.payer_email = intent.receipt_email;
        }

        if first_failure {
            self.notify(&payment, "payment_failed", Some(reason.as_str()))
                .await?;
        }
        self.business.save_payment(&payment).await?;
        info!("Payment failed"; payment_id = payment.id, reason = reason);
        Ok(())
    }

    async fn charge_refunded(&self, charge: ChargeObject) -> Result<()> {
        let Some(reference) = charge.payment_intent else {
            warn!("Refunded charge has no payment intent"; charge = charge.id);
            return Ok(());
        };
        let Some(mut payment) = self.business.payment_by_provider_reference(&reference).await?
        else {
            missing("payment", &reference);
            return Ok(());
        };

        payment.status = if charge.amount_refunded >= charge.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.refunded_amount = charge.amount_refunded;
        payment.updated_at = self.queue.now();
        self.business.save_payment(&payment).await?;
        info!(
            "Payment refunded";
            payment_id = payment.id,
            refunded = charge.amount_refunded,
            amount = charge.amount
        );
        Ok(())
    }

    async fn account_updated(&self, account: AccountObject) -> Result<()> {
        let Some(stored) = self.business.connected_account(&account.id).await? else {
            missing("connected_account", &account.id);
            return Ok(());
        };
        let stored = ConnectedAccount {
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            updated_at: self.queue.now(),
            ..stored
        };
        self.business.save_connected_account(&stored).await?;
        info!(
            "Connected account updated";
            account = stored.id,
            charges_enabled = stored.charges_enabled,
            payouts_enabled = stored.payouts_enabled
        );
        Ok(())
    }

    async fn checkout_completed(&self, session: CheckoutSessionObject) -> Result<()> {
        let Some(payment_id) = session.client_reference_id else {
            warn!("Checkout session has no client reference"; session = session.id);
            return Ok(());
        };
        let Some(mut payment) = self.business.payment(&payment_id).await? else {
            missing("payment", &payment_id);
            return Ok(());
        };

        let now = self.queue.now();
        if let Some(reference) = session.payment_intent {
            payment.provider_reference = Some(reference);
        }
        let newly_paid =
            session.payment_status == "paid" && payment.status != PaymentStatus::Succeeded;
        if newly_paid {
            payment.status = PaymentStatus::Succeeded;
            payment.paid_at = Some(now);
        }
        payment.updated_at = now;

        if newly_paid {
            self.notify(&payment, "payment_receipt", None).await?;
        }
        self.business.save_payment(&payment).await?;
        info!(
            "Checkout completed";
            payment_id = payment.id,
            payment_status = session.payment_status
        );
        Ok(())
    }

    async fn subscription_created(&self, subscription: SubscriptionObject) -> Result<()> {
        let record = SubscriptionRecord {
            id: subscription.id,
            customer_id: subscription.customer,
            status: subscription.status,
            current_period_end: timestamp(subscription.current_period_end),
            cancel_at_period_end: subscription.cancel_at_period_end,
            canceled_at: timestamp(subscription.canceled_at),
            updated_at: self.queue.now(),
        };
        self.business.save_subscription(&record).await?;
        info!("Subscription recorded"; subscription = record.id, status = record.status);
        Ok(())
    }

    async fn subscription_updated(&self, subscription: SubscriptionObject) -> Result<()> {
        let Some(mut record) = self.business.subscription(&subscription.id).await? else {
            missing("subscription", &subscription.id);
            return Ok(());
        };
        record.status = subscription.status;
        record.current_period_end = timestamp(subscription.current_period_end);
        record.cancel_at_period_end = subscription.cancel_at_period_end;
        if let Some(canceled_at) = timestamp(subscription.canceled_at) {
            record.canceled_at = Some(canceled_at);
        }
        record.updated_at = self.queue.now();
        self.business.save_subscription(&record).await?;
        info!("Subscription updated"; subscription = record.id, status = record.status);
        Ok(())
    }

    async fn subscription_deleted(&self, subscription: SubscriptionObject) -> Result<()> {
        let Some(mut record) = self.business.subscription(&subscription.id).await? else {
            missing("subscription", &subscription.id);
            return Ok(());
        };
        let now = self.queue.now();
        record.status = "canceled".to_string();
        record.canceled_at = timestamp(subscription.canceled_at).or(Some(now));
        record.updated_at = now;
        self.business.save_subscription(&record).await?;
        info!("Subscription canceled"; subscription = record.id);
        Ok(())
    }

    async fn invoice_paid(&self, invoice: InvoiceObject) -> Result<()> {
        let now = self.queue.now();
        let record = InvoiceRecord {
            id: invoice.id,
            customer_id: invoice.customer,
            subscription_id: invoice.subscription,
            amount_paid: invoice.amount_paid,
            currency: invoice.currency,
            status: "paid".to_string(),
            paid_at: Some(now),
        };
        self.business.save_invoice(&record).await?;

        if let Some(subscription_id) = &record.subscription_id {
            match self.business.subscription(subscription_id).await? {
                Some(mut subscription) => {
                    subscription.status = "active".to_string();
                    subscription.updated_at = now;
                    self.business.save_subscription(&subscription).await?;
                }
                None => missing("subscription", subscription_id),
            }
        }
        info!("Invoice paid"; invoice = record.id, amount = record.amount_paid);
        Ok(())
    }
}

#[async_trait]
impl EventRouter for StripeRouter {
    fn source(&self) -> &str {
        STRIPE_SOURCE
    }

    async fn route(&self, event: &WebhookEvent) -> Result<()> {
        match StripeEventType::parse(&event.event_type) {
            StripeEventType::PaymentIntentSucceeded => {
                self.payment_succeeded(object(event)?).await
            }
            StripeEventType::PaymentIntentFailed => self.payment_failed(object(event)?).await,
            StripeEventType::ChargeRefunded => self.charge_refunded(object(event)?).await,
            StripeEventType::AccountUpdated => self.account_updated(object(event)?).await,
            StripeEventType::CheckoutSessionCompleted => {
                self.checkout_completed(object(event)?).await
            }
            StripeEventType::SubscriptionCreated => {
                self.subscription_created(object(event)?).await
            }
            StripeEventType::SubscriptionUpdated => {
                self.subscription_updated(object(event)?).await
            }
            StripeEventType::SubscriptionDeleted => {
                self.subscription_deleted(object(event)?).await
            }
            StripeEventType::InvoicePaid => self.invoice_paid(object(event)?).await,
            StripeEventType::Unknown(other) => {
                info!("Unhandled Stripe event type"; event_type = other, event_id = event.id);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for StripeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::MemoryBusinessStore;
    use chrono::TimeZone;
    use porter_queue::{ManualClock, MemoryJobStore};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 15, 30, 0).unwrap()
    }

    fn router() -> (StripeRouter, MemoryBusinessStore, MemoryJobStore) {
        let business = MemoryBusinessStore::new();
        let jobs = MemoryJobStore::new();
        let queue =
            Queue::new(Arc::new(jobs.clone())).with_clock(Arc::new(ManualClock::new(at())));
        (
            StripeRouter::new(Arc::new(business.clone()), queue),
            business,
            jobs,
        )
    }

    fn stripe_event(event_type: &str, object: serde_json::Value) -> WebhookEvent {
        WebhookEvent::new(
            STRIPE_SOURCE,
            "evt_test",
            event_type,
            serde_json::json!({"id": "evt_test", "type": event_type, "data": {"object": object}}),
            at(),
        )
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(
            StripeEventType::parse("invoice.paid"),
            StripeEventType::InvoicePaid
        );
        assert_eq!(
            StripeEventType::parse("customer.subscription.deleted"),
            StripeEventType::SubscriptionDeleted
        );
        let unknown = StripeEventType::parse("payout.paid");
        assert!(!unknown.is_handled());
    }

    #[tokio::test]
    async fn test_payment_succeeded_notifies_once() {
        let (router, business, jobs) = router();
        business.insert_payment(
            PaymentRecord::new("pay_1", 150_000, "usd")
                .with_provider_reference("pi_1")
                .with_payer_email("tenant@example.com"),
        );
        let event = stripe_event("payment_intent.succeeded", serde_json::json!({"id": "pi_1"}));

        router.route(&event).await.unwrap();
        router.route(&event).await.unwrap();

        let payment = business.payment("pay_1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.paid_at, Some(at()));

        let notifications = jobs.jobs().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].job_type, "send_email_notification");
        assert_eq!(notifications[0].queue, "notifications");
        assert_eq!(notifications[0].payload["template"], "payment_receipt");
        assert_eq!(notifications[0].payload["recipient"], "tenant@example.com");
    }

    #[tokio::test]
    async fn test_payment_failed_records_reason() {
        let (router, business, jobs) = router();
        business.insert_payment(PaymentRecord::new("pay_2", 9_900, "usd").with_provider_reference("pi_2"));
        let event = stripe_event(
            "payment_intent.payment_failed",
            serde_json::json!({
                "id": "pi_2",
                "last_payment_error": {"code": "card_declined", "message": "Your card was declined."}
            }),
        );

        router.route(&event).await.unwrap();
        router.route(&event).await.unwrap();

        let payment = business.payment("pay_2").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("Your card was declined."));
        assert_eq!(jobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_charge_refunded_partial_and_full() {
        let (router, business, _) = router();
        business.insert_payment(PaymentRecord::new("pay_3", 10_000, "usd").with_provider_reference("pi_3"));

        let partial = stripe_event(
            "charge.refunded",
            serde_json::json!({"id": "ch_3", "payment_intent": "pi_3", "amount": 10_000, "amount_refunded": 2_500}),
        );
        router.route(&partial).await.unwrap();
        let payment = business.payment("pay_3").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(payment.refunded_amount, 2_500);

        let full = stripe_event(
            "charge.refunded",
            serde_json::json!({"id": "ch_3", "payment_intent": "pi_3", "amount": 10_000, "amount_refunded": 10_000}),
        );
        router.route(&full).await.unwrap();
        let payment = business.payment("pay_3").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_account_updated() {
        let (router, business, _) = router();
        business.insert_connected_account(ConnectedAccount::new("acct_1"));
        let event = stripe_event(
            "account.updated",
            serde_json::json!({"id": "acct_1", "charges_enabled": true, "payouts_enabled": true, "details_submitted": true}),
        );
        router.route(&event).await.unwrap();

        let account = business.connected_account("acct_1").await.unwrap().unwrap();
        assert!(account.charges_enabled && account.payouts_enabled && account.details_submitted);
    }

    #[tokio::test]
    async fn test_checkout_attaches_reference() {
        let (router, business, jobs) = router();
        business.insert_payment(PaymentRecord::new("pay_4", 50_000, "usd"));
        let event = stripe_event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "client_reference_id": "pay_4",
                "payment_intent": "pi_4",
                "payment_status": "paid"
            }),
        );
        router.route(&event).await.unwrap();

        let payment = business.payment("pay_4").await.unwrap().unwrap();
        assert_eq!(payment.provider_reference.as_deref(), Some("pi_4"));
        assert_eq!(payment.status, PaymentStatus::Succeeded);

        // the intent event that follows finds the payment already settled
        let intent = stripe_event("payment_intent.succeeded", serde_json::json!({"id": "pi_4"}));
        router.route(&intent).await.unwrap();
        assert_eq!(jobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_subscription_lifecycle_and_invoice() {
        let (router, business, _) = router();
        let created = stripe_event(
            "customer.subscription.created",
            serde_json::json!({"id": "sub_1", "customer": "cus_1", "status": "incomplete", "current_period_end": 1_714_521_600}),
        );
        router.route(&created).await.unwrap();
        let sub = business.subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, "incomplete");
        assert_eq!(
            sub.current_period_end,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );

        let invoice = stripe_event(
            "invoice.paid",
            serde_json::json!({"id": "in_1", "customer": "cus_1", "subscription": "sub_1", "amount_paid": 2_900, "currency": "usd"}),
        );
        router.route(&invoice).await.unwrap();
        assert_eq!(business.subscription("sub_1").await.unwrap().unwrap().status, "active");
        let stored = business.invoice("in_1").await.unwrap().unwrap();
        assert_eq!(stored.status, "paid");
        assert_eq!(stored.paid_at, Some(at()));

        let updated = stripe_event(
            "customer.subscription.updated",
            serde_json::json!({"id": "sub_1", "customer": "cus_1", "status": "past_due", "cancel_at_period_end": true}),
        );
        router.route(&updated).await.unwrap();
        let sub = business.subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, "past_due");
        assert!(sub.cancel_at_period_end);

        let deleted = stripe_event(
            "customer.subscription.deleted",
            serde_json::json!({"id": "sub_1", "customer": "cus_1", "status": "canceled"}),
        );
        router.route(&deleted).await.unwrap();
        let sub = business.subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, "canceled");
        assert_eq!(sub.canceled_at, Some(at()));
    }

    #[tokio::test]
    async fn test_missing_records_are_tolerated() {
        let (router, business, jobs) = router();
        for (event_type, object) in [
            ("payment_intent.succeeded", serde_json::json!({"id": "pi_x"})),
            ("account.updated", serde_json::json!({"id": "acct_x"})),
            (
                "customer.subscription.updated",
                serde_json::json!({"id": "sub_x", "customer": "cus_x", "status": "active"}),
            ),
        ] {
            router.route(&stripe_event(event_type, object)).await.unwrap();
        }
        assert!(jobs.is_empty().await);
        assert!(business.payment("pi_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let (router, _, _) = router();
        let event = WebhookEvent::new(
            STRIPE_SOURCE,
            "evt_bad",
            "charge.refunded",
            serde_json::json!({"id": "evt_bad"}),
            at(),
        );
        assert!(matches!(
            router.route(&event).await.unwrap_err(),
            WebhookError::Payload(_)
        ));

        let event = stripe_event("charge.refunded", serde_json::json!({"id": "ch_1"}));
        assert!(matches!(
            router.route(&event).await.unwrap_err(),
            WebhookError::Payload(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_is_handled() {
        let (router, _, _) = router();
        let event = stripe_event("payout.paid", serde_json::json!({}));
        router.route(&event).await.unwrap();
    }
}
