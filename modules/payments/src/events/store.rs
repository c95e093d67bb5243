//! Outbox/inbox storage port
//!
//! The outbox records every published event keyed by event id; `published_at`
//! is set only after the stream append succeeds, so rows without it mark
//! events that still need publishing after a crash. The inbox records
//! (consumer_group, event_id) pairs already processed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::ApiResult;
use crate::events::envelope::{EventFilter, PaymentEvent};
use crate::repos::{paginate_sorted, sort_desc, ListQuery, Page};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an outbox row; false when the event id already exists
    async fn outbox_insert(&self, event: &PaymentEvent) -> ApiResult<bool>;

    /// Record the stream position after a successful append
    async fn outbox_mark_published(
        &self,
        event_id: &str,
        stream_id: &str,
        published_at: DateTime<Utc>,
    ) -> ApiResult<()>;

    /// Events whose stream append has not been confirmed (crash recovery)
    async fn outbox_unpublished(&self) -> ApiResult<Vec<PaymentEvent>>;

    /// Published events, filtered and cursor-paginated
    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>>;

    /// Claim (group, event_id); false when already claimed
    async fn inbox_insert(&self, group: &str, event_id: &str) -> ApiResult<bool>;

    /// Release a claim so the event can be reprocessed on redelivery
    async fn inbox_delete(&self, group: &str, event_id: &str) -> ApiResult<()>;
}

struct OutboxRow {
    event: PaymentEvent,
    stream_id: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct InMemoryState {
    outbox: Vec<OutboxRow>,
    inbox: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn outbox_insert(&self, event: &PaymentEvent) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.outbox.iter().any(|row| row.event.id == event.id) {
            return Ok(false);
        }
        state.outbox.push(OutboxRow {
            event: event.clone(),
            stream_id: None,
            published_at: None,
        });
        Ok(true)
    }

    async fn outbox_mark_published(
        &self,
        event_id: &str,
        stream_id: &str,
        published_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.outbox.iter_mut().find(|row| row.event.id == event_id) {
            row.stream_id = Some(stream_id.to_string());
            row.published_at = Some(published_at);
        }
        Ok(())
    }

    async fn outbox_unpublished(&self) -> ApiResult<Vec<PaymentEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|row| row.published_at.is_none())
            .map(|row| row.event.clone())
            .collect())
    }

    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<PaymentEvent> = state
            .outbox
            .iter()
            .filter(|row| row.published_at.is_some())
            .map(|row| row.event.clone())
            .filter(|event| filter.matches(event))
            .collect();
        sort_desc(&mut events, |e| (e.occurred_at, e.id.clone()));
        paginate_sorted(&events, query, |e| e.id.as_str())
    }

    async fn inbox_insert(&self, group: &str, event_id: &str) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .inbox
            .insert((group.to_string(), event_id.to_string())))
    }

    async fn inbox_delete(&self, group: &str, event_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .inbox
            .remove(&(group.to_string(), event_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::envelope::EventType;
    use serde_json::json;

    fn event(intent_id: &str) -> PaymentEvent {
        PaymentEvent::new(
            EventType::PaymentIntentCreated,
            Utc::now(),
            json!({"payment_intent_id": intent_id}),
        )
    }

    #[tokio::test]
    async fn outbox_insert_is_idempotent_on_event_id() {
        let store = InMemoryEventStore::new();
        let e = event("pi_1");
        assert!(store.outbox_insert(&e).await.unwrap());
        assert!(!store.outbox_insert(&e).await.unwrap());
    }

    #[tokio::test]
    async fn unpublished_rows_surface_until_marked() {
        let store = InMemoryEventStore::new();
        let e = event("pi_1");
        store.outbox_insert(&e).await.unwrap();
        assert_eq!(store.outbox_unpublished().await.unwrap().len(), 1);

        store
            .outbox_mark_published(&e.id, "7", Utc::now())
            .await
            .unwrap();
        assert!(store.outbox_unpublished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_published_hides_pending_rows() {
        let store = InMemoryEventStore::new();
        let published = event("pi_1");
        let pending = event("pi_2");
        store.outbox_insert(&published).await.unwrap();
        store.outbox_insert(&pending).await.unwrap();
        store
            .outbox_mark_published(&published.id, "1", Utc::now())
            .await
            .unwrap();

        let page = store
            .list_published(&EventFilter::default(), &ListQuery::first(10))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, published.id);
    }

    #[tokio::test]
    async fn inbox_claims_once_per_group() {
        let store = InMemoryEventStore::new();
        assert!(store.inbox_insert("g1", "evt_1").await.unwrap());
        assert!(!store.inbox_insert("g1", "evt_1").await.unwrap());
        assert!(store.inbox_insert("g2", "evt_1").await.unwrap());

        store.inbox_delete("g1", "evt_1").await.unwrap();
        assert!(store.inbox_insert("g1", "evt_1").await.unwrap());
    }
}
