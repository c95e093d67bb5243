//! In-memory repository backends for dev and test

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    Chargeback, ChargebackStatus, IntentStatus, LedgerEntry, PaymentIntent, Refund,
    WebhookDeadLetter, WebhookDelivery, WebhookEndpoint,
};
use crate::repos::payment_repo::{
    ChargebackFilter, IntentFilter, LedgerFilter, PaymentRepository, RefundFilter,
};
use crate::repos::webhook_repo::{DeadLetterFilter, DeliveryFilter, WebhookRepository};
use crate::repos::{paginate_sorted, sort_desc, ListQuery, Page};

#[derive(Default)]
struct PaymentState {
    intents: Vec<PaymentIntent>,
    refunds: Vec<Refund>,
    chargebacks: Vec<Chargeback>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    state: Mutex<PaymentState>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_intent(&self, intent: &PaymentIntent) -> ApiResult<()> {
        self.state.lock().unwrap().intents.push(intent.clone());
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> ApiResult<Option<PaymentIntent>> {
        let state = self.state.lock().unwrap();
        Ok(state.intents.iter().find(|i| i.id == id).cloned())
    }

    async fn update_intent(
        &self,
        intent: &PaymentIntent,
        expected_status: IntentStatus,
    ) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.intents.iter_mut().find(|i| i.id == intent.id) {
            Some(stored) if stored.status == expected_status => {
                *stored = intent.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ApiError::not_found("payment intent")),
        }
    }

    async fn list_intents(
        &self,
        filter: &IntentFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentIntent>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<PaymentIntent> = state
            .intents
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        sort_desc(&mut matched, |i| (i.created_at, i.id.clone()));
        paginate_sorted(&matched, query, |i| i.id.as_str())
    }

    async fn insert_refund(&self, refund: &Refund) -> ApiResult<()> {
        self.state.lock().unwrap().refunds.push(refund.clone());
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> ApiResult<Option<Refund>> {
        let state = self.state.lock().unwrap();
        Ok(state.refunds.iter().find(|r| r.id == id).cloned())
    }

    async fn list_refunds(
        &self,
        filter: &RefundFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Refund>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<Refund> = state
            .refunds
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_desc(&mut matched, |r| (r.created_at, r.id.clone()));
        paginate_sorted(&matched, query, |r| r.id.as_str())
    }

    async fn insert_chargeback(&self, chargeback: &Chargeback) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .chargebacks
            .push(chargeback.clone());
        Ok(())
    }

    async fn get_chargeback(&self, id: &str) -> ApiResult<Option<Chargeback>> {
        let state = self.state.lock().unwrap();
        Ok(state.chargebacks.iter().find(|c| c.id == id).cloned())
    }

    async fn update_chargeback(
        &self,
        chargeback: &Chargeback,
        expected_status: ChargebackStatus,
    ) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state
            .chargebacks
            .iter_mut()
            .find(|c| c.id == chargeback.id)
        {
            Some(stored) if stored.status == expected_status => {
                *stored = chargeback.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ApiError::not_found("chargeback")),
        }
    }

    async fn list_chargebacks(
        &self,
        filter: &ChargebackFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Chargeback>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<Chargeback> = state
            .chargebacks
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        sort_desc(&mut matched, |c| (c.created_at, c.id.clone()));
        paginate_sorted(&matched, query, |c| c.id.as_str())
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> ApiResult<()> {
        self.state.lock().unwrap().ledger.push(entry.clone());
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        filter: &LedgerFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<LedgerEntry>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_desc(&mut matched, |e| (e.created_at, e.id.clone()));
        paginate_sorted(&matched, query, |e| e.id.as_str())
    }
}

#[derive(Default)]
struct WebhookState {
    endpoints: Vec<WebhookEndpoint>,
    deliveries: Vec<WebhookDelivery>,
    dead_letters: Vec<WebhookDeadLetter>,
}

#[derive(Default)]
pub struct InMemoryWebhookRepository {
    state: Mutex<WebhookState>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .push(endpoint.clone());
        Ok(())
    }

    async fn get_endpoint(&self, id: &str) -> ApiResult<Option<WebhookEndpoint>> {
        let state = self.state.lock().unwrap();
        Ok(state.endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(stored) => {
                *stored = endpoint.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_endpoints(&self, query: &ListQuery) -> ApiResult<Page<WebhookEndpoint>> {
        let state = self.state.lock().unwrap();
        let mut endpoints = state.endpoints.clone();
        sort_desc(&mut endpoints, |e| (e.created_at, e.id.clone()));
        paginate_sorted(&endpoints, query, |e| e.id.as_str())
    }

    async fn endpoints_for_event(&self, event_type: &str) -> ApiResult<Vec<WebhookEndpoint>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<WebhookEndpoint> = state
            .endpoints
            .iter()
            .filter(|e| e.enabled && e.subscribes_to(event_type))
            .cloned()
            .collect();
        sort_desc(&mut matched, |e| (e.created_at, e.id.clone()));
        Ok(matched)
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .deliveries
            .push(delivery.clone());
        Ok(())
    }

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDelivery>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<WebhookDelivery> = state
            .deliveries
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        sort_desc(&mut matched, |d| (d.created_at, d.id.clone()));
        paginate_sorted(&matched, query, |d| d.id.as_str())
    }

    async fn insert_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .dead_letters
            .push(dead_letter.clone());
        Ok(())
    }

    async fn get_dead_letter(&self, id: &str) -> ApiResult<Option<WebhookDeadLetter>> {
        let state = self.state.lock().unwrap();
        Ok(state.dead_letters.iter().find(|d| d.id == id).cloned())
    }

    async fn update_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state
            .dead_letters
            .iter_mut()
            .find(|d| d.id == dead_letter.id)
        {
            Some(stored) => {
                *stored = dead_letter.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_dead_letters(
        &self,
        filter: &DeadLetterFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDeadLetter>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<WebhookDeadLetter> = state
            .dead_letters
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        sort_desc(&mut matched, |d| (d.failed_at, d.id.clone()));
        paginate_sorted(&matched, query, |d| d.id.as_str())
    }
}
