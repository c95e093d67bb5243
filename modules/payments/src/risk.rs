//! Risk assessment for payment confirmation
//!
//! Pure decision over intent attributes; no I/O. The orchestrator maps
//! `Deny` to a failed intent and `Review` to `requires_action`.

use crate::models::PaymentIntent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Allow,
    Review { reason: String },
    Deny { reason: String },
}

pub struct RiskEngine {
    review_amount_threshold: i64,
}

impl RiskEngine {
    pub fn new(review_amount_threshold: i64) -> Self {
        Self {
            review_amount_threshold,
        }
    }

    pub fn assess(&self, intent: &PaymentIntent) -> RiskVerdict {
        if intent.customer_id.starts_with("blocked_") {
            return RiskVerdict::Deny {
                reason: "customer_blocked".to_string(),
            };
        }
        if intent.payment_method_token.starts_with("tok_risk_review") {
            return RiskVerdict::Review {
                reason: "payment_method_flagged".to_string(),
            };
        }
        if intent.amount >= self.review_amount_threshold {
            return RiskVerdict::Review {
                reason: "amount_over_review_threshold".to_string(),
            };
        }
        RiskVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id, CaptureMethod, IntentStatus, PaymentMethodType};
    use chrono::Utc;

    fn intent(customer_id: &str, token: &str, amount: i64) -> PaymentIntent {
        PaymentIntent {
            id: new_id("pi"),
            amount,
            currency: "BRL".into(),
            status: IntentStatus::RequiresConfirmation,
            capture_method: CaptureMethod::Automatic,
            customer_id: customer_id.into(),
            payment_method_type: PaymentMethodType::Card,
            payment_method_token: token.into(),
            authorized_amount: 0,
            captured_amount: 0,
            refunded_amount: 0,
            provider: None,
            provider_reference: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blocked_customers_are_denied() {
        let engine = RiskEngine::new(1_000_000);
        let verdict = engine.assess(&intent("blocked_001", "tok_test_visa", 1000));
        assert!(matches!(verdict, RiskVerdict::Deny { .. }));
    }

    #[test]
    fn large_amounts_go_to_review() {
        let engine = RiskEngine::new(1_000_000);
        assert!(matches!(
            engine.assess(&intent("cus_1", "tok_test_visa", 1_000_000)),
            RiskVerdict::Review { .. }
        ));
        assert_eq!(
            engine.assess(&intent("cus_1", "tok_test_visa", 999_999)),
            RiskVerdict::Allow
        );
    }

    #[test]
    fn flagged_tokens_go_to_review() {
        let engine = RiskEngine::new(1_000_000);
        assert!(matches!(
            engine.assess(&intent("cus_1", "tok_risk_review_x", 100)),
            RiskVerdict::Review { .. }
        ));
    }
}
