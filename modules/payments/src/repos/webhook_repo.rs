//! Webhook persistence port: endpoints, delivery log, dead letters

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::models::{
    DeadLetterStatus, DeliveryStatus, WebhookDeadLetter, WebhookDelivery, WebhookEndpoint,
};
use crate::repos::{ListQuery, Page};

#[derive(Debug, Default, Clone)]
pub struct DeliveryFilter {
    pub endpoint_id: Option<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub status: Option<DeliveryStatus>,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &WebhookDelivery) -> bool {
        self.endpoint_id
            .as_ref()
            .is_none_or(|id| &delivery.endpoint_id == id)
            && self
                .event_id
                .as_ref()
                .is_none_or(|id| &delivery.event_id == id)
            && self
                .event_type
                .as_ref()
                .is_none_or(|t| &delivery.event_type == t)
            && self.status.is_none_or(|s| delivery.status == s)
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeadLetterFilter {
    pub status: Option<DeadLetterStatus>,
    pub event_type: Option<String>,
    pub endpoint_id: Option<String>,
}

impl DeadLetterFilter {
    pub fn matches(&self, dead_letter: &WebhookDeadLetter) -> bool {
        self.status.is_none_or(|s| dead_letter.status == s)
            && self
                .event_type
                .as_ref()
                .is_none_or(|t| &dead_letter.event_type == t)
            && self
                .endpoint_id
                .as_ref()
                .is_none_or(|id| &dead_letter.endpoint_id == id)
    }
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<()>;

    async fn get_endpoint(&self, id: &str) -> ApiResult<Option<WebhookEndpoint>>;

    /// Full-row update; returns false when the endpoint does not exist
    async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<bool>;

    async fn list_endpoints(&self, query: &ListQuery) -> ApiResult<Page<WebhookEndpoint>>;

    /// Enabled endpoints whose subscription covers `event_type`
    async fn endpoints_for_event(&self, event_type: &str) -> ApiResult<Vec<WebhookEndpoint>>;

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> ApiResult<()>;

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDelivery>>;

    async fn insert_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<()>;

    async fn get_dead_letter(&self, id: &str) -> ApiResult<Option<WebhookDeadLetter>>;

    /// Full-row update used by the replay path
    async fn update_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<bool>;

    async fn list_dead_letters(
        &self,
        filter: &DeadLetterFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDeadLetter>>;
}
