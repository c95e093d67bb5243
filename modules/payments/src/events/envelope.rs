//! Event envelope and type discriminants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::new_id;

pub const API_VERSION: &str = "v1";
pub const EVENT_SOURCE: &str = "payments-orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "payment_intent.created")]
    PaymentIntentCreated,
    #[serde(rename = "payment_intent.processing")]
    PaymentIntentProcessing,
    #[serde(rename = "payment_intent.requires_action")]
    PaymentIntentRequiresAction,
    #[serde(rename = "payment_intent.succeeded")]
    PaymentIntentSucceeded,
    #[serde(rename = "payment_intent.failed")]
    PaymentIntentFailed,
    #[serde(rename = "payment_intent.canceled")]
    PaymentIntentCanceled,
    #[serde(rename = "refund.succeeded")]
    RefundSucceeded,
    #[serde(rename = "refund.failed")]
    RefundFailed,
    #[serde(rename = "chargeback.opened")]
    ChargebackOpened,
    #[serde(rename = "chargeback.won")]
    ChargebackWon,
    #[serde(rename = "chargeback.lost")]
    ChargebackLost,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentIntentCreated => "payment_intent.created",
            Self::PaymentIntentProcessing => "payment_intent.processing",
            Self::PaymentIntentRequiresAction => "payment_intent.requires_action",
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentFailed => "payment_intent.failed",
            Self::PaymentIntentCanceled => "payment_intent.canceled",
            Self::RefundSucceeded => "refund.succeeded",
            Self::RefundFailed => "refund.failed",
            Self::ChargebackOpened => "chargeback.opened",
            Self::ChargebackWon => "chargeback.won",
            Self::ChargebackLost => "chargeback.lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(JsonValue::String(s.to_string())).ok()
    }
}

/// Wire envelope: `{id, api_version, source, event_version, type,
/// occurred_at, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub api_version: String,
    pub source: String,
    pub event_version: i32,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub data: JsonValue,
}

impl PaymentEvent {
    pub fn new(event_type: EventType, occurred_at: DateTime<Utc>, data: JsonValue) -> Self {
        Self {
            id: new_id("evt"),
            api_version: API_VERSION.to_string(),
            source: EVENT_SOURCE.to_string(),
            event_version: 1,
            event_type,
            occurred_at,
            data,
        }
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.data.get("payment_intent_id").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub payment_intent_id: Option<String>,
    pub event_type: Option<EventType>,
    pub occurred_from: Option<DateTime<Utc>>,
    pub occurred_to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &PaymentEvent) -> bool {
        self.payment_intent_id
            .as_deref()
            .is_none_or(|id| event.payment_intent_id() == Some(id))
            && self.event_type.is_none_or(|t| event.event_type == t)
            && self.occurred_from.is_none_or(|t| event.occurred_at >= t)
            && self.occurred_to.is_none_or(|t| event.occurred_at <= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_eleven_discriminants_round_trip() {
        let types = [
            "payment_intent.created",
            "payment_intent.processing",
            "payment_intent.requires_action",
            "payment_intent.succeeded",
            "payment_intent.failed",
            "payment_intent.canceled",
            "refund.succeeded",
            "refund.failed",
            "chargeback.opened",
            "chargeback.won",
            "chargeback.lost",
        ];
        for name in types {
            let parsed = EventType::parse(name).unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert!(EventType::parse("payment_intent.exploded").is_none());
    }

    #[test]
    fn envelope_wire_shape() {
        let event = PaymentEvent::new(
            EventType::PaymentIntentCreated,
            Utc::now(),
            json!({"payment_intent_id": "pi_1"}),
        );
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "payment_intent.created");
        assert_eq!(wire["api_version"], "v1");
        assert_eq!(wire["source"], "payments-orchestrator");
        assert_eq!(wire["event_version"], 1);
        assert!(wire["id"].as_str().unwrap().starts_with("evt_"));

        let back: PaymentEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(back.payment_intent_id(), Some("pi_1"));
    }

    #[test]
    fn filter_matches_intent_and_type() {
        let event = PaymentEvent::new(
            EventType::RefundSucceeded,
            Utc::now(),
            json!({"payment_intent_id": "pi_9", "refund_id": "re_1"}),
        );
        let mut filter = EventFilter {
            payment_intent_id: Some("pi_9".into()),
            event_type: Some(EventType::RefundSucceeded),
            ..Default::default()
        };
        assert!(filter.matches(&event));
        filter.event_type = Some(EventType::RefundFailed);
        assert!(!filter.matches(&event));
    }
}
