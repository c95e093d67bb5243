//! Domain entities for the payment orchestration service
//!
//! Monetary amounts are non-negative integers in the currency's minor units.
//! Currency codes are uppercase 3-letter ISO codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// Generate a prefixed external id (e.g. `pi_0a1b...`)
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresConfirmation => "requires_confirmation",
            Self::Processing => "processing",
            Self::RequiresAction => "requires_action",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requires_confirmation" => Some(Self::RequiresConfirmation),
            "processing" => Some(Self::Processing),
            "requires_action" => Some(Self::RequiresAction),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Automatic,
    Manual,
}

impl CaptureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    Pix,
    Boleto,
    Wallet,
    BankTransfer,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Pix => "pix",
            Self::Boleto => "boleto",
            Self::Wallet => "wallet",
            Self::BankTransfer => "bank_transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(Self::Card),
            "pix" => Some(Self::Pix),
            "boleto" => Some(Self::Boleto),
            "wallet" => Some(Self::Wallet),
            "bank_transfer" => Some(Self::BankTransfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub capture_method: CaptureMethod,
    pub customer_id: String,
    pub payment_method_type: PaymentMethodType,
    pub payment_method_token: String,
    pub authorized_amount: i64,
    pub captured_amount: i64,
    pub refunded_amount: i64,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Captured funds not yet refunded
    pub fn amount_refundable(&self) -> i64 {
        (self.captured_amount - self.refunded_amount).max(0)
    }

    /// API representation, including derived fields
    pub fn to_api(&self) -> JsonValue {
        json!({
            "id": self.id,
            "object": "payment_intent",
            "amount": self.amount,
            "currency": self.currency,
            "status": self.status,
            "capture_method": self.capture_method,
            "customer_id": self.customer_id,
            "payment_method_type": self.payment_method_type,
            "payment_method_token": self.payment_method_token,
            "authorized_amount": self.authorized_amount,
            "captured_amount": self.captured_amount,
            "refunded_amount": self.refunded_amount,
            "amount_refundable": self.amount_refundable(),
            "provider": self.provider,
            "provider_reference": self.provider_reference,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    RequestedByCustomer,
    Duplicate,
    Fraud,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub status: RefundStatus,
    pub reason: Option<RefundReason>,
    pub failure_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargebackStatus {
    Open,
    UnderReview,
    Won,
    Lost,
}

impl ChargebackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::UnderReview => "under_review",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "under_review" => Some(Self::UnderReview),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    /// Won and lost chargebacks cannot be resolved again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    /// Statuses that reserve disputable funds
    pub fn reserves_funds(&self) -> bool {
        matches!(self, Self::Open | Self::UnderReview | Self::Lost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargebackReason {
    Fraud,
    ChargebackDispute,
    ServiceNotReceived,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chargeback {
    pub id: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub reason: ChargebackReason,
    pub status: ChargebackStatus,
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Authorization,
    Capture,
    Refund,
    Chargeback,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorization" => Some(Self::Authorization),
            "capture" => Some(Self::Capture),
            "refund" => Some(Self::Refund),
            "chargeback" => Some(Self::Chargeback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDirection {
    Debit,
    Credit,
}

impl LedgerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// Append-only audit record for a money movement; never mutated
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub payment_intent_id: String,
    pub refund_id: Option<String>,
    pub entry_type: LedgerEntryType,
    pub direction: LedgerDirection,
    pub amount: i64,
    pub currency: String,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: String,
    /// Subscribed event types; empty means all
    pub events: Vec<String>,
    pub secret: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type)
    }

    /// API representation; the signing secret is never echoed after creation
    pub fn to_api(&self, include_secret: bool) -> JsonValue {
        let mut body = json!({
            "id": self.id,
            "object": "webhook_endpoint",
            "url": self.url,
            "events": self.events,
            "enabled": self.enabled,
            "created_at": self.created_at,
        });
        if include_secret {
            body["secret"] = JsonValue::String(self.secret.clone());
        }
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Succeeded,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-attempt webhook delivery log
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub endpoint_id: String,
    pub event_id: String,
    pub event_type: String,
    pub attempt: i32,
    pub status: DeliveryStatus,
    pub response_status: Option<u16>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    Replayed,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Replayed => "replayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "replayed" => Some(Self::Replayed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    PermanentFailure,
    MaxAttemptsExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermanentFailure => "permanent_failure",
            Self::MaxAttemptsExhausted => "max_attempts_exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanent_failure" => Some(Self::PermanentFailure),
            "max_attempts_exhausted" => Some(Self::MaxAttemptsExhausted),
            _ => None,
        }
    }
}

/// A webhook that exhausted retries or hit a permanent failure
///
/// Carries a snapshot of the endpoint url and the full event payload so the
/// delivery can be replayed even if the endpoint is later edited.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDeadLetter {
    pub id: String,
    pub endpoint_id: String,
    pub endpoint_url: String,
    pub event_id: String,
    pub event_type: String,
    pub attempts: i32,
    pub status: DeadLetterStatus,
    pub replay_count: i32,
    pub failure_reason: DeadLetterReason,
    pub response_status: Option<u16>,
    pub error_code: Option<String>,
    pub event_payload: JsonValue,
    pub failed_at: DateTime<Utc>,
    pub last_replayed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_status_round_trips() {
        for s in [
            "requires_confirmation",
            "processing",
            "requires_action",
            "succeeded",
            "failed",
            "canceled",
        ] {
            assert_eq!(IntentStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(IntentStatus::parse("unknown").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(IntentStatus::Succeeded.is_terminal());
        assert!(IntentStatus::Failed.is_terminal());
        assert!(IntentStatus::Canceled.is_terminal());
        assert!(!IntentStatus::Processing.is_terminal());
    }

    #[test]
    fn amount_refundable_never_negative() {
        let mut intent = PaymentIntent {
            id: new_id("pi"),
            amount: 1000,
            currency: "BRL".into(),
            status: IntentStatus::Succeeded,
            capture_method: CaptureMethod::Automatic,
            customer_id: "cus_1".into(),
            payment_method_type: PaymentMethodType::Card,
            payment_method_token: "tok_test".into(),
            authorized_amount: 1000,
            captured_amount: 500,
            refunded_amount: 700,
            provider: None,
            provider_reference: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(intent.amount_refundable(), 0);
        intent.refunded_amount = 200;
        assert_eq!(intent.amount_refundable(), 300);
    }

    #[test]
    fn endpoint_event_matching() {
        let mut endpoint = WebhookEndpoint {
            id: new_id("whe"),
            url: "https://example.com/hook".into(),
            events: vec![],
            secret: "whsec_x".into(),
            enabled: true,
            created_at: Utc::now(),
        };
        assert!(endpoint.subscribes_to("payment_intent.created"));
        endpoint.events = vec!["refund.succeeded".into()];
        assert!(endpoint.subscribes_to("refund.succeeded"));
        assert!(!endpoint.subscribes_to("payment_intent.created"));
    }
}
