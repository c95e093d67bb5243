//! In-memory event pipeline
//!
//! Publish appends to an in-process log and synchronously invokes every
//! subscriber in registration order. Suitable for dev and tests; the durable
//! pipeline replaces it in production.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::ApiResult;
use crate::events::envelope::{EventFilter, PaymentEvent};
use crate::events::{EventPipeline, EventSubscriber};
use crate::metrics;
use crate::repos::{paginate_sorted, sort_desc, ListQuery, Page};

#[derive(Default)]
pub struct InMemoryEventPipeline {
    log: Mutex<Vec<PaymentEvent>>,
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
}

impl InMemoryEventPipeline {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPipeline for InMemoryEventPipeline {
    async fn publish(&self, event: PaymentEvent) -> ApiResult<()> {
        self.log.lock().unwrap().push(event.clone());
        metrics::EVENTS_PUBLISHED.inc();
        tracing::debug!(event_id = %event.id, event_type = %event.event_type.as_str(), "event published");

        let subscribers: Vec<Arc<dyn EventSubscriber>> =
            self.subscribers.lock().unwrap().clone();
        for subscriber in subscribers {
            if let Err(e) = subscriber.on_event(&event).await {
                tracing::error!(
                    subscriber = %subscriber.name(),
                    event_id = %event.id,
                    error = %format!("{e:#}"),
                    "subscriber failed"
                );
            }
        }
        Ok(())
    }

    fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>> {
        let log = self.log.lock().unwrap();
        let mut events: Vec<PaymentEvent> =
            log.iter().filter(|e| filter.matches(e)).cloned().collect();
        sort_desc(&mut events, |e| (e.occurred_at, e.id.clone()));
        paginate_sorted(&events, query, |e| e.id.as_str())
    }
}
