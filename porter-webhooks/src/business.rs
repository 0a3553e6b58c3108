//! Business records touched by webhook sub-handlers.
//!
//! The records themselves belong to the host application. Porter only needs
//! to look them up by id or provider reference and write back a few fields,
//! which is what [`BusinessStore`] captures.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Payment lifecycle as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    PartiallyRefunded,
}

/// A payment the application is collecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,

    /// Provider-side id (e.g. a payment intent id), attached once known
    pub provider_reference: Option<String>,

    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payer_email: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub refunded_amount: i64,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(id: impl Into<String>, amount: i64, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_reference: None,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            payer_email: None,
            paid_at: None,
            failure_reason: None,
            refunded_amount: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_provider_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    pub fn with_payer_email(mut self, email: impl Into<String>) -> Self {
        self.payer_email = Some(email.into());
        self
    }
}

/// A connected payout account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    /// Provider account id
    pub id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConnectedAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Provider subscription id
    pub id: String,
    pub customer_id: String,

    /// Provider status string, e.g. "active", "past_due", "canceled"
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Provider invoice id
    pub id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub amount_paid: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Read/write access to the application's payment records.
#[async_trait]
pub trait BusinessStore: Send + Sync {
    async fn payment(&self, id: &str) -> Result<Option<PaymentRecord>>;

    async fn payment_by_provider_reference(&self, reference: &str)
    -> Result<Option<PaymentRecord>>;

    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()>;

    async fn connected_account(&self, id: &str) -> Result<Option<ConnectedAccount>>;

    async fn save_connected_account(&self, account: &ConnectedAccount) -> Result<()>;

    async fn subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Insert or replace by id.
    async fn save_subscription(&self, subscription: &SubscriptionRecord) -> Result<()>;

    async fn invoice(&self, id: &str) -> Result<Option<InvoiceRecord>>;

    /// Insert or replace by id.
    async fn save_invoice(&self, invoice: &InvoiceRecord) -> Result<()>;
}

#[derive(Debug, Default)]
struct Records {
    payments: HashMap<String, PaymentRecord>,
    accounts: HashMap<String, ConnectedAccount>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    invoices: HashMap<String, InvoiceRecord>,
}

/// Business records held in memory. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryBusinessStore {
    records: Arc<RwLock<Records>>,
}

impl MemoryBusinessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_payment(&self, payment: PaymentRecord) {
        self.records
            .write()
            .payments
            .insert(payment.id.clone(), payment);
    }

    pub fn insert_connected_account(&self, account: ConnectedAccount) {
        self.records
            .write()
            .accounts
            .insert(account.id.clone(), account);
    }

    pub fn insert_subscription(&self, subscription: SubscriptionRecord) {
        self.records
            .write()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }
}

#[async_trait]
impl BusinessStore for MemoryBusinessStore {
    async fn payment(&self, id: &str) -> Result<Option<PaymentRecord>> {
        Ok(self.records.read().payments.get(id).cloned())
    }

    async fn payment_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>> {
        Ok(self
            .records
            .read()
            .payments
            .values()
            .find(|p| p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()> {
        self.insert_payment(payment.clone());
        Ok(())
    }

    async fn connected_account(&self, id: &str) -> Result<Option<ConnectedAccount>> {
        Ok(self.records.read().accounts.get(id).cloned())
    }

    async fn save_connected_account(&self, account: &ConnectedAccount) -> Result<()> {
        self.insert_connected_account(account.clone());
        Ok(())
    }

    async fn subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>> {
        Ok(self.records.read().subscriptions.get(id).cloned())
    }

    async fn save_subscription(&self, subscription: &SubscriptionRecord) -> Result<()> {
        self.insert_subscription(subscription.clone());
        Ok(())
    }

    async fn invoice(&self, id: &str) -> Result<Option<InvoiceRecord>> {
        Ok(self.records.read().invoices.get(id).cloned())
    }

    async fn save_invoice(&self, invoice: &InvoiceRecord) -> Result<()> {
        self.records
            .write()
            .invoices
            .insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_payment_lookup_by_provider_reference() {
        let store = MemoryBusinessStore::new();
        store.insert_payment(PaymentRecord::new("pay_1", 120_000, "usd").with_provider_reference("pi_1"));
        store.insert_payment(PaymentRecord::new("pay_2", 5_000, "usd"));

        let found = store.payment_by_provider_reference("pi_1").await.unwrap().unwrap();
        assert_eq!(found.id, "pay_1");
        assert!(store.payment_by_provider_reference("pi_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = MemoryBusinessStore::new();
        let mut payment = PaymentRecord::new("pay_1", 100, "eur");
        store.save_payment(&payment).await.unwrap();

        payment.status = PaymentStatus::Succeeded;
        store.save_payment(&payment).await.unwrap();
        assert_eq!(
            store.payment("pay_1").await.unwrap().unwrap().status,
            PaymentStatus::Succeeded
        );
    }
}
