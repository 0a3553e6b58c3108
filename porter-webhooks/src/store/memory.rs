//! In-process event store.

use super::EventStore;
use crate::error::Result;
use crate::event::{EventId, WebhookEvent, WebhookEventStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Events {
    by_id: HashMap<EventId, WebhookEvent>,
    by_external: HashMap<(String, String), EventId>,
}

impl Events {
    fn update<F>(&mut self, id: EventId, apply: F) -> bool
    where
        F: FnOnce(&mut WebhookEvent) -> bool,
    {
        self.by_id.get_mut(&id).map(apply).unwrap_or(false)
    }
}

/// Events held in memory. Clones share the same events.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<RwLock<Events>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<(WebhookEvent, bool)> {
        let mut events = self.events.write().await;
        let key = (event.source.clone(), event.external_event_id.clone());
        if let Some(existing) = events
            .by_external
            .get(&key)
            .and_then(|id| events.by_id.get(id))
        {
            return Ok((existing.clone(), false));
        }
        events.by_external.insert(key, event.id);
        events.by_id.insert(event.id, event.clone());
        Ok((event.clone(), true))
    }

    async fn get(&self, id: EventId) -> Result<Option<WebhookEvent>> {
        Ok(self.events.read().await.by_id.get(&id).cloned())
    }

    async fn find(&self, source: &str, external_event_id: &str) -> Result<Option<WebhookEvent>> {
        let events = self.events.read().await;
        let key = (source.to_string(), external_event_id.to_string());
        Ok(events
            .by_external
            .get(&key)
            .and_then(|id| events.by_id.get(id))
            .cloned())
    }

    async fn list(&self, status: Option<WebhookEventStatus>) -> Result<Vec<WebhookEvent>> {
        let mut listed: Vec<_> = self
            .events
            .read()
            .await
            .by_id
            .values()
            .filter(|event| status.is_none_or(|s| event.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(listed)
    }

    async fn begin_attempt(
        &self,
        id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>> {
        let mut events = self.events.write().await;
        match events.by_id.get_mut(&id) {
            Some(event) if !event.is_processed() => {
                event.begin_attempt(now);
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_processed(&self, id: EventId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.events.write().await.update(id, |event| {
            event.mark_processed(now);
            true
        }))
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<bool> {
        Ok(self.events.write().await.update(id, |event| {
            if event.is_processed() {
                return false;
            }
            event.mark_failed(error);
            true
        }))
    }

    async fn reset_failed(&self, id: EventId) -> Result<bool> {
        Ok(self.events.write().await.update(id, |event| {
            if event.status != WebhookEventStatus::Failed {
                return false;
            }
            event.status = WebhookEventStatus::Received;
            event.error_message = None;
            true
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(external_id: &str) -> WebhookEvent {
        WebhookEvent::new(
            "stripe",
            external_id,
            "payment_intent.succeeded",
            serde_json::json!({}),
            now(),
        )
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_source_and_external_id() {
        let store = MemoryEventStore::new();
        let first = event("evt_1");
        let (stored, created) = store.insert_if_absent(&first).await.unwrap();
        assert!(created);
        assert_eq!(stored.id, first.id);

        let (existing, created) = store.insert_if_absent(&event("evt_1")).await.unwrap();
        assert!(!created);
        assert_eq!(existing.id, first.id);

        let mut other_source = event("evt_1");
        other_source.source = "github".into();
        assert!(store.insert_if_absent(&other_source).await.unwrap().1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_begin_attempt_skips_processed() {
        let store = MemoryEventStore::new();
        let event = event("evt_2");
        store.insert_if_absent(&event).await.unwrap();

        let started = store.begin_attempt(event.id, now()).await.unwrap().unwrap();
        assert_eq!(started.attempts, 1);
        assert!(store.mark_processed(event.id, now()).await.unwrap());

        assert!(store.begin_attempt(event.id, now()).await.unwrap().is_none());
        assert!(!store.mark_failed(event.id, "late").await.unwrap());
        let stored = store.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::Processed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_reset_failed_only_applies_to_failed() {
        let store = MemoryEventStore::new();
        let event = event("evt_3");
        store.insert_if_absent(&event).await.unwrap();

        assert!(!store.reset_failed(event.id).await.unwrap());
        store.mark_failed(event.id, "boom").await.unwrap();
        assert!(store.reset_failed(event.id).await.unwrap());
        assert!(!store.reset_failed(event.id).await.unwrap());

        let stored = store.find("stripe", "evt_3").await.unwrap().unwrap();
        assert_eq!(stored.status, WebhookEventStatus::Received);
        assert!(stored.error_message.is_none());
        assert_eq!(
            store
                .list(Some(WebhookEventStatus::Received))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
