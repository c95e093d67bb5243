//! Payment event pipeline
//!
//! Producers publish exactly once per state change; delivery downstream is
//! at-least-once, deduplicated per consumer group at the inbox.

pub mod durable;
pub mod envelope;
pub mod memory;
pub mod pg_store;
pub mod store;

pub use durable::DurableEventPipeline;
pub use envelope::{EventFilter, EventType, PaymentEvent};
pub use memory::InMemoryEventPipeline;
pub use pg_store::PgEventStore;
pub use store::{EventStore, InMemoryEventStore};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::repos::{ListQuery, Page};

/// Downstream consumer of payment events (webhook dispatcher, projections)
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &PaymentEvent) -> anyhow::Result<()>;
}

/// Publish/subscribe port for the orchestrator and the API surface
#[async_trait]
pub trait EventPipeline: Send + Sync {
    /// Durably record and propagate one event
    async fn publish(&self, event: PaymentEvent) -> ApiResult<()>;

    /// Register a subscriber; must be called before consumption starts
    fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>);

    /// Events visible to `GET /v1/payment-events`
    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>>;
}
