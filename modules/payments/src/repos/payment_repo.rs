//! Payment persistence port: intents, refunds, chargebacks, ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ApiResult;
use crate::models::{
    Chargeback, ChargebackStatus, IntentStatus, LedgerEntry, LedgerEntryType, PaymentIntent,
    PaymentMethodType, Refund, RefundStatus,
};
use crate::repos::{ListQuery, Page};

#[derive(Debug, Default, Clone)]
pub struct IntentFilter {
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<IntentStatus>,
    pub customer_id: Option<String>,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub payment_method_type: Option<PaymentMethodType>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl IntentFilter {
    pub fn matches(&self, intent: &PaymentIntent) -> bool {
        self.amount_min.is_none_or(|min| intent.amount >= min)
            && self.amount_max.is_none_or(|max| intent.amount <= max)
            && self.currency.as_ref().is_none_or(|c| &intent.currency == c)
            && self.status.is_none_or(|s| intent.status == s)
            && self
                .customer_id
                .as_ref()
                .is_none_or(|c| &intent.customer_id == c)
            && self
                .provider
                .as_ref()
                .is_none_or(|p| intent.provider.as_ref() == Some(p))
            && self
                .provider_reference
                .as_ref()
                .is_none_or(|r| intent.provider_reference.as_ref() == Some(r))
            && self
                .payment_method_type
                .is_none_or(|m| intent.payment_method_type == m)
            && self.created_from.is_none_or(|t| intent.created_at >= t)
            && self.created_to.is_none_or(|t| intent.created_at <= t)
    }
}

#[derive(Debug, Default, Clone)]
pub struct RefundFilter {
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    pub payment_intent_id: Option<String>,
    pub status: Option<RefundStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl RefundFilter {
    pub fn matches(&self, refund: &Refund) -> bool {
        self.amount_min.is_none_or(|min| refund.amount >= min)
            && self.amount_max.is_none_or(|max| refund.amount <= max)
            && self
                .payment_intent_id
                .as_ref()
                .is_none_or(|id| &refund.payment_intent_id == id)
            && self.status.is_none_or(|s| refund.status == s)
            && self.created_from.is_none_or(|t| refund.created_at >= t)
            && self.created_to.is_none_or(|t| refund.created_at <= t)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ChargebackFilter {
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    pub payment_intent_id: Option<String>,
    pub status: Option<ChargebackStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl ChargebackFilter {
    pub fn matches(&self, chargeback: &Chargeback) -> bool {
        self.amount_min.is_none_or(|min| chargeback.amount >= min)
            && self.amount_max.is_none_or(|max| chargeback.amount <= max)
            && self
                .payment_intent_id
                .as_ref()
                .is_none_or(|id| &chargeback.payment_intent_id == id)
            && self.status.is_none_or(|s| chargeback.status == s)
            && self.created_from.is_none_or(|t| chargeback.created_at >= t)
            && self.created_to.is_none_or(|t| chargeback.created_at <= t)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LedgerFilter {
    pub payment_intent_id: Option<String>,
    pub entry_type: Option<LedgerEntryType>,
    pub currency: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.payment_intent_id
            .as_ref()
            .is_none_or(|id| &entry.payment_intent_id == id)
            && self.entry_type.is_none_or(|t| entry.entry_type == t)
            && self.currency.as_ref().is_none_or(|c| &entry.currency == c)
            && self.created_from.is_none_or(|t| entry.created_at >= t)
            && self.created_to.is_none_or(|t| entry.created_at <= t)
    }
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_intent(&self, intent: &PaymentIntent) -> ApiResult<()>;

    async fn get_intent(&self, id: &str) -> ApiResult<Option<PaymentIntent>>;

    /// Persist the full row iff the stored status still equals
    /// `expected_status`; returns false when another transition won the race
    async fn update_intent(
        &self,
        intent: &PaymentIntent,
        expected_status: IntentStatus,
    ) -> ApiResult<bool>;

    async fn list_intents(
        &self,
        filter: &IntentFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentIntent>>;

    async fn insert_refund(&self, refund: &Refund) -> ApiResult<()>;

    async fn get_refund(&self, id: &str) -> ApiResult<Option<Refund>>;

    async fn list_refunds(
        &self,
        filter: &RefundFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Refund>>;

    async fn insert_chargeback(&self, chargeback: &Chargeback) -> ApiResult<()>;

    async fn get_chargeback(&self, id: &str) -> ApiResult<Option<Chargeback>>;

    /// CAS on chargeback status, mirroring `update_intent`
    async fn update_chargeback(
        &self,
        chargeback: &Chargeback,
        expected_status: ChargebackStatus,
    ) -> ApiResult<bool>;

    async fn list_chargebacks(
        &self,
        filter: &ChargebackFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Chargeback>>;

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> ApiResult<()>;

    async fn list_ledger_entries(
        &self,
        filter: &LedgerFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<LedgerEntry>>;
}
