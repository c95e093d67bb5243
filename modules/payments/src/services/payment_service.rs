//! Payment orchestrator
//!
//! Every write is wrapped in `execute_idempotent`: the (scope, key) lock is
//! held for the whole execute+store sequence, a stored record with a matching
//! payload fingerprint replays the original response, and a mismatched
//! fingerprint is an `idempotency_conflict`. State changes go through the
//! transition table with a compare-and-set at the repository, so a racing
//! transition on the same intent surfaces as `invalid_state_transition`.

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;

use crate::canonical::fingerprint;
use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::events::{EventPipeline, EventType, PaymentEvent};
use crate::idempotency::{IdempotencyRecord, IdempotencyStore};
use crate::models::{
    new_id, CaptureMethod, Chargeback, ChargebackReason, ChargebackStatus, IntentStatus,
    LedgerDirection, LedgerEntry, LedgerEntryType, PaymentIntent, PaymentMethodType, Refund,
    RefundReason, RefundStatus,
};
use crate::providers::{AuthorizeRequest, ProviderRouter};
use crate::repos::{ChargebackFilter, ListQuery, PaymentRepository};
use crate::risk::{RiskEngine, RiskVerdict};
use crate::services::state_machine;
use crate::validation::{validate_currency, validate_positive_amount};

/// Completed idempotent write: the recorded response plus whether it was
/// served from the idempotency store
#[derive(Debug, Clone)]
pub struct Completed {
    pub status_code: u16,
    pub body: JsonValue,
    pub replayed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodData {
    #[serde(rename = "type")]
    pub method_type: PaymentMethodType,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub customer: CustomerRef,
    pub payment_method: PaymentMethodData,
    #[serde(default)]
    pub capture_method: Option<CaptureMethod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaptureRequest {
    /// Defaults to the full capturable balance
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_intent_id: String,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<RefundReason>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChargebackRequest {
    pub payment_intent_id: String,
    pub amount: i64,
    pub reason: ChargebackReason,
    #[serde(default)]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveChargebackRequest {
    pub status: String,
}

pub struct PaymentOrchestrator {
    repo: Arc<dyn PaymentRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    pipeline: Arc<dyn EventPipeline>,
    router: Arc<ProviderRouter>,
    risk: RiskEngine,
    clock: Arc<dyn Clock>,
}

impl PaymentOrchestrator {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        pipeline: Arc<dyn EventPipeline>,
        router: Arc<ProviderRouter>,
        risk: RiskEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            idempotency,
            pipeline,
            router,
            risk,
            clock,
        }
    }

    async fn execute_idempotent<F, Fut>(
        &self,
        scope: String,
        key: &str,
        payload: &JsonValue,
        op: F,
    ) -> ApiResult<Completed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<(StatusCode, JsonValue)>>,
    {
        let payload_fingerprint = fingerprint(payload);
        let guard = self.idempotency.lock(&scope, key).await?;
        let result = self
            .run_locked(&scope, key, &payload_fingerprint, op)
            .await;
        guard.release().await;
        result
    }

    async fn run_locked<F, Fut>(
        &self,
        scope: &str,
        key: &str,
        payload_fingerprint: &str,
        op: F,
    ) -> ApiResult<Completed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<(StatusCode, JsonValue)>>,
    {
        if let Some(record) = self.idempotency.get(scope, key).await? {
            if record.fingerprint == payload_fingerprint {
                tracing::info!(scope = %scope, key = %key, "idempotent replay");
                return Ok(Completed {
                    status_code: record.status_code,
                    body: record.response_body,
                    replayed: true,
                });
            }
            return Err(ApiError::idempotency_conflict());
        }

        let (status, body) = op().await?;
        self.idempotency
            .put(
                scope,
                key,
                IdempotencyRecord {
                    fingerprint: payload_fingerprint.to_string(),
                    status_code: status.as_u16(),
                    response_body: body.clone(),
                    created_at: self.clock.now(),
                },
            )
            .await?;

        Ok(Completed {
            status_code: status.as_u16(),
            body,
            replayed: false,
        })
    }

    /// Apply one transition through the table, CAS-guarded at the repository
    async fn transition(
        &self,
        intent: &mut PaymentIntent,
        to: IntentStatus,
    ) -> ApiResult<()> {
        state_machine::ensure_transition(intent.status, to)?;
        let from = intent.status;
        intent.status = to;
        intent.updated_at = self.clock.now();
        if !self.repo.update_intent(intent, from).await? {
            // Another writer moved the intent first
            return Err(ApiError::invalid_state_transition(from.as_str(), to.as_str()));
        }
        tracing::info!(
            payment_intent_id = %intent.id,
            from = %from.as_str(),
            to = %to.as_str(),
            "payment intent transition"
        );
        Ok(())
    }

    async fn emit(&self, event_type: EventType, data: JsonValue) -> ApiResult<()> {
        self.pipeline
            .publish(PaymentEvent::new(event_type, self.clock.now(), data))
            .await
    }

    fn intent_event_data(intent: &PaymentIntent) -> JsonValue {
        json!({
            "payment_intent_id": intent.id,
            "status": intent.status,
            "amount": intent.amount,
            "currency": intent.currency,
            "customer_id": intent.customer_id,
        })
    }

    async fn record_ledger(
        &self,
        intent: &PaymentIntent,
        entry_type: LedgerEntryType,
        direction: LedgerDirection,
        amount: i64,
        refund_id: Option<String>,
    ) -> ApiResult<()> {
        self.repo
            .insert_ledger_entry(&LedgerEntry {
                id: new_id("le"),
                payment_intent_id: intent.id.clone(),
                refund_id,
                entry_type,
                direction,
                amount,
                currency: intent.currency.clone(),
                provider: intent.provider.clone(),
                provider_reference: intent.provider_reference.clone(),
                created_at: self.clock.now(),
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn create_payment_intent(
        &self,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        self.execute_idempotent("create_payment_intent".to_string(), key, &payload, || async {
            let request: CreateIntentRequest = serde_json::from_value(payload.clone())
                .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;
            validate_positive_amount(request.amount, "amount")?;
            let currency = validate_currency(&request.currency)?;

            let now = self.clock.now();
            let intent = PaymentIntent {
                id: new_id("pi"),
                amount: request.amount,
                currency,
                status: IntentStatus::RequiresConfirmation,
                capture_method: request.capture_method.unwrap_or(CaptureMethod::Automatic),
                customer_id: request.customer.id,
                payment_method_type: request.payment_method.method_type,
                payment_method_token: request.payment_method.token,
                authorized_amount: 0,
                captured_amount: 0,
                refunded_amount: 0,
                provider: None,
                provider_reference: None,
                created_at: now,
                updated_at: now,
            };
            self.repo.insert_intent(&intent).await?;
            self.emit(
                EventType::PaymentIntentCreated,
                Self::intent_event_data(&intent),
            )
            .await?;

            Ok((StatusCode::CREATED, intent.to_api()))
        })
        .await
    }

    pub async fn confirm_payment_intent(
        &self,
        id: &str,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        let scope = format!("confirm_payment_intent:{id}");
        self.execute_idempotent(scope, key, &payload, || async {
            let mut intent = self
                .repo
                .get_intent(id)
                .await?
                .ok_or_else(|| ApiError::not_found("payment intent"))?;

            if intent.status != IntentStatus::RequiresConfirmation {
                // Confirm is a no-op on an already-confirmed intent
                return Ok((StatusCode::OK, intent.to_api()));
            }

            // Candidate selection happens before any state is committed so a
            // routing failure leaves the intent confirmable
            let candidates = self.router.candidates(intent.payment_method_type)?;

            self.transition(&mut intent, IntentStatus::Processing).await?;
            self.emit(
                EventType::PaymentIntentProcessing,
                Self::intent_event_data(&intent),
            )
            .await?;

            match self.risk.assess(&intent) {
                RiskVerdict::Deny { reason } => {
                    self.transition(&mut intent, IntentStatus::Failed).await?;
                    let mut data = Self::intent_event_data(&intent);
                    data["failure_code"] = json!("risk_denied");
                    data["reason"] = json!(reason);
                    self.emit(EventType::PaymentIntentFailed, data).await?;
                    return Ok((StatusCode::OK, intent.to_api()));
                }
                RiskVerdict::Review { reason } => {
                    self.transition(&mut intent, IntentStatus::RequiresAction)
                        .await?;
                    let mut data = Self::intent_event_data(&intent);
                    data["reason"] = json!(reason);
                    self.emit(EventType::PaymentIntentRequiresAction, data).await?;
                    return Ok((StatusCode::OK, intent.to_api()));
                }
                RiskVerdict::Allow => {}
            }

            // Authorization fan-out: transient failures move to the next
            // candidate, a decline stops the loop
            let request = AuthorizeRequest {
                amount: intent.amount,
                currency: intent.currency.clone(),
                payment_method_type: intent.payment_method_type,
                payment_method_token: intent.payment_method_token.clone(),
            };
            let mut authorized = false;
            let mut attempted = false;
            let mut final_failure: Option<String> = None;
            for gateway in candidates {
                attempted = true;
                let response = gateway.authorize(&request).await;
                self.router.record_outcome(gateway.name(), &response);

                // Last attempt wins, even when it failed
                intent.provider = Some(gateway.name().to_string());
                intent.provider_reference = response.reference.clone();

                if response.ok {
                    authorized = true;
                    break;
                }
                tracing::warn!(
                    payment_intent_id = %intent.id,
                    provider = %gateway.name(),
                    failure_code = response.failure_code.as_deref().unwrap_or("unknown"),
                    "authorization attempt failed"
                );
                final_failure = response.failure_code.clone();
                if !response.is_transient_failure() {
                    break;
                }
            }

            if !authorized {
                self.transition(&mut intent, IntentStatus::Failed).await?;
                let failure_code = if attempted {
                    final_failure.unwrap_or_else(|| "provider_unavailable".to_string())
                } else {
                    "provider_unavailable".to_string()
                };
                let mut data = Self::intent_event_data(&intent);
                data["failure_code"] = json!(failure_code);
                self.emit(EventType::PaymentIntentFailed, data).await?;
                return Ok((StatusCode::OK, intent.to_api()));
            }

            intent.authorized_amount = intent.amount;
            self.record_ledger(
                &intent,
                LedgerEntryType::Authorization,
                LedgerDirection::Credit,
                intent.authorized_amount,
                None,
            )
            .await?;

            if intent.capture_method == CaptureMethod::Automatic {
                intent.captured_amount = intent.amount;
                self.transition(&mut intent, IntentStatus::Succeeded).await?;
                self.record_ledger(
                    &intent,
                    LedgerEntryType::Capture,
                    LedgerDirection::Credit,
                    intent.captured_amount,
                    None,
                )
                .await?;
                self.emit(
                    EventType::PaymentIntentSucceeded,
                    Self::intent_event_data(&intent),
                )
                .await?;
            } else {
                self.transition(&mut intent, IntentStatus::RequiresAction)
                    .await?;
                let mut data = Self::intent_event_data(&intent);
                data["reason"] = json!("manual_capture_required");
                self.emit(EventType::PaymentIntentRequiresAction, data).await?;
            }

            Ok((StatusCode::OK, intent.to_api()))
        })
        .await
    }

    pub async fn capture_payment_intent(
        &self,
        id: &str,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        let scope = format!("capture_payment_intent:{id}");
        self.execute_idempotent(scope, key, &payload, || async {
            // Capture without a body means "the full capturable balance"
            let request: CaptureRequest = if payload.is_null() {
                CaptureRequest::default()
            } else {
                serde_json::from_value(payload.clone())
                    .map_err(|e| ApiError::invalid_request_body(e.to_string()))?
            };

            let mut intent = self
                .repo
                .get_intent(id)
                .await?
                .ok_or_else(|| ApiError::not_found("payment intent"))?;

            if intent.status.is_terminal() {
                return Err(ApiError::invalid_payment_state(format!(
                    "Cannot capture a payment intent in terminal status `{}`",
                    intent.status.as_str()
                )));
            }
            if intent.capture_method != CaptureMethod::Manual {
                return Err(ApiError::invalid_capture_method());
            }
            if intent.status != IntentStatus::RequiresAction {
                return Err(ApiError::invalid_payment_state(format!(
                    "Capture requires status `requires_action`, found `{}`",
                    intent.status.as_str()
                )));
            }
            let reference = intent
                .provider_reference
                .clone()
                .ok_or_else(ApiError::missing_provider_reference)?;

            let capturable = intent.authorized_amount - intent.captured_amount;
            let amount = request.amount.unwrap_or(capturable);
            validate_positive_amount(amount, "amount")?;
            if amount > capturable {
                return Err(ApiError::amount_exceeds_capturable(capturable));
            }

            let provider_name = intent
                .provider
                .clone()
                .ok_or_else(ApiError::missing_provider_reference)?;
            let gateway = self
                .router
                .gateway(&provider_name)
                .ok_or_else(ApiError::provider_not_available)?;

            self.transition(&mut intent, IntentStatus::Processing).await?;
            self.emit(
                EventType::PaymentIntentProcessing,
                Self::intent_event_data(&intent),
            )
            .await?;

            let response = gateway.capture(&reference, amount, &intent.currency).await;
            self.router.record_outcome(&provider_name, &response);

            if !response.ok {
                self.transition(&mut intent, IntentStatus::Failed).await?;
                let mut data = Self::intent_event_data(&intent);
                data["failure_code"] =
                    json!(response.failure_code.unwrap_or_else(|| "capture_failed".into()));
                self.emit(EventType::PaymentIntentFailed, data).await?;
                return Ok((StatusCode::OK, intent.to_api()));
            }

            intent.captured_amount += amount;
            self.record_ledger(
                &intent,
                LedgerEntryType::Capture,
                LedgerDirection::Credit,
                amount,
                None,
            )
            .await?;

            if intent.captured_amount >= intent.authorized_amount {
                self.transition(&mut intent, IntentStatus::Succeeded).await?;
                self.emit(
                    EventType::PaymentIntentSucceeded,
                    Self::intent_event_data(&intent),
                )
                .await?;
            } else {
                self.transition(&mut intent, IntentStatus::RequiresAction)
                    .await?;
            }

            Ok((StatusCode::OK, intent.to_api()))
        })
        .await
    }

    pub async fn cancel_payment_intent(
        &self,
        id: &str,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        let scope = format!("cancel_payment_intent:{id}");
        self.execute_idempotent(scope, key, &payload, || async {
            let mut intent = self
                .repo
                .get_intent(id)
                .await?
                .ok_or_else(|| ApiError::not_found("payment intent"))?;

            if intent.status == IntentStatus::Canceled {
                return Ok((StatusCode::OK, intent.to_api()));
            }
            if intent.status.is_terminal() {
                return Err(ApiError::invalid_payment_state(format!(
                    "Cannot cancel a payment intent in terminal status `{}`",
                    intent.status.as_str()
                )));
            }
            if intent.status == IntentStatus::Processing {
                return Err(ApiError::invalid_payment_state(
                    "Cannot cancel a payment intent while processing",
                ));
            }

            self.transition(&mut intent, IntentStatus::Canceled).await?;
            self.emit(
                EventType::PaymentIntentCanceled,
                Self::intent_event_data(&intent),
            )
            .await?;

            Ok((StatusCode::OK, intent.to_api()))
        })
        .await
    }

    pub async fn create_refund(&self, key: &str, payload: JsonValue) -> ApiResult<Completed> {
        self.execute_idempotent("create_refund".to_string(), key, &payload, || async {
            let request: CreateRefundRequest = serde_json::from_value(payload.clone())
                .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;

            let mut intent = self
                .repo
                .get_intent(&request.payment_intent_id)
                .await?
                .ok_or_else(|| ApiError::not_found("payment intent"))?;

            let reference = intent.provider_reference.clone().ok_or_else(|| {
                ApiError::refund_not_allowed(
                    "The payment intent has no successful authorization to refund against",
                )
            })?;
            let provider_name = intent.provider.clone().ok_or_else(|| {
                ApiError::refund_not_allowed(
                    "The payment intent has no successful authorization to refund against",
                )
            })?;

            validate_positive_amount(request.amount, "amount")?;
            let refundable = intent.captured_amount - intent.refunded_amount;
            if request.amount > refundable {
                return Err(ApiError::amount_exceeds_refundable(refundable.max(0)));
            }

            let gateway = self
                .router
                .gateway(&provider_name)
                .ok_or_else(ApiError::provider_not_available)?;
            let response = gateway
                .refund(&reference, request.amount, &intent.currency)
                .await;
            self.router.record_outcome(&provider_name, &response);

            let refund = Refund {
                id: new_id("re"),
                payment_intent_id: intent.id.clone(),
                amount: request.amount,
                status: if response.ok {
                    RefundStatus::Succeeded
                } else {
                    RefundStatus::Failed
                },
                reason: request.reason,
                failure_code: response.failure_code.clone(),
                created_at: self.clock.now(),
            };
            self.repo.insert_refund(&refund).await?;

            if response.ok {
                intent.refunded_amount += request.amount;
                intent.updated_at = self.clock.now();
                let current = intent.status;
                if !self.repo.update_intent(&intent, current).await? {
                    return Err(ApiError::invalid_state_transition(
                        current.as_str(),
                        current.as_str(),
                    ));
                }
                self.record_ledger(
                    &intent,
                    LedgerEntryType::Refund,
                    LedgerDirection::Debit,
                    refund.amount,
                    Some(refund.id.clone()),
                )
                .await?;
                self.emit(
                    EventType::RefundSucceeded,
                    json!({
                        "refund_id": refund.id,
                        "payment_intent_id": intent.id,
                        "amount": refund.amount,
                        "currency": intent.currency,
                    }),
                )
                .await?;
            } else {
                self.emit(
                    EventType::RefundFailed,
                    json!({
                        "refund_id": refund.id,
                        "payment_intent_id": intent.id,
                        "amount": refund.amount,
                        "failure_code": refund.failure_code,
                    }),
                )
                .await?;
            }

            Ok((StatusCode::CREATED, serde_json::to_value(&refund)?))
        })
        .await
    }

    pub async fn create_chargeback(
        &self,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        self.execute_idempotent("create_chargeback".to_string(), key, &payload, || async {
            let request: CreateChargebackRequest = serde_json::from_value(payload.clone())
                .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;

            let intent = self
                .repo
                .get_intent(&request.payment_intent_id)
                .await?
                .ok_or_else(|| ApiError::not_found("payment intent"))?;

            validate_positive_amount(request.amount, "amount")?;
            let reserved = self.reserved_chargeback_amount(&intent.id).await?;
            let disputable =
                (intent.captured_amount - intent.refunded_amount - reserved).max(0);
            if request.amount > disputable {
                return Err(ApiError::amount_exceeds_disputable(disputable));
            }

            let now = self.clock.now();
            let chargeback = Chargeback {
                id: new_id("cb"),
                payment_intent_id: intent.id.clone(),
                amount: request.amount,
                reason: request.reason,
                status: ChargebackStatus::Open,
                evidence_url: request.evidence_url,
                created_at: now,
                updated_at: now,
            };
            self.repo.insert_chargeback(&chargeback).await?;
            self.emit(
                EventType::ChargebackOpened,
                json!({
                    "chargeback_id": chargeback.id,
                    "payment_intent_id": intent.id,
                    "amount": chargeback.amount,
                    "reason": chargeback.reason,
                }),
            )
            .await?;

            Ok((StatusCode::CREATED, serde_json::to_value(&chargeback)?))
        })
        .await
    }

    /// Funds already tied up by chargebacks that reserve against the intent
    async fn reserved_chargeback_amount(&self, intent_id: &str) -> ApiResult<i64> {
        let filter = ChargebackFilter {
            payment_intent_id: Some(intent_id.to_string()),
            ..Default::default()
        };
        let mut reserved = 0;
        let mut query = ListQuery::first(200);
        loop {
            let page = self.repo.list_chargebacks(&filter, &query).await?;
            for chargeback in &page.items {
                if chargeback.status.reserves_funds() {
                    reserved += chargeback.amount;
                }
            }
            match (page.has_more, page.items.last()) {
                (true, Some(last)) => query = ListQuery::after(200, last.id.clone()),
                _ => break,
            }
        }
        Ok(reserved)
    }

    pub async fn resolve_chargeback(
        &self,
        id: &str,
        key: &str,
        payload: JsonValue,
    ) -> ApiResult<Completed> {
        let scope = format!("resolve_chargeback:{id}");
        self.execute_idempotent(scope, key, &payload, || async {
            let request: ResolveChargebackRequest = serde_json::from_value(payload.clone())
                .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;
            let target = ChargebackStatus::parse(&request.status)
                .filter(|s| *s != ChargebackStatus::Open)
                .ok_or_else(|| {
                    ApiError::validation(
                        "status",
                        "must be one of `under_review`, `won`, `lost`",
                    )
                })?;

            let mut chargeback = self
                .repo
                .get_chargeback(id)
                .await?
                .ok_or_else(|| ApiError::not_found("chargeback"))?;

            if chargeback.status == target {
                return Ok((StatusCode::OK, serde_json::to_value(&chargeback)?));
            }
            if chargeback.status.is_terminal() {
                return Err(ApiError::invalid_chargeback_state(format!(
                    "Chargeback is already resolved as `{}`",
                    chargeback.status.as_str()
                )));
            }

            let from = chargeback.status;
            chargeback.status = target;
            chargeback.updated_at = self.clock.now();
            if !self.repo.update_chargeback(&chargeback, from).await? {
                return Err(ApiError::invalid_chargeback_state(
                    "Chargeback was resolved concurrently",
                ));
            }

            match target {
                ChargebackStatus::Lost => {
                    let intent = self
                        .repo
                        .get_intent(&chargeback.payment_intent_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("payment intent"))?;
                    self.record_ledger(
                        &intent,
                        LedgerEntryType::Chargeback,
                        LedgerDirection::Debit,
                        chargeback.amount,
                        None,
                    )
                    .await?;
                    self.emit(
                        EventType::ChargebackLost,
                        json!({
                            "chargeback_id": chargeback.id,
                            "payment_intent_id": chargeback.payment_intent_id,
                            "amount": chargeback.amount,
                        }),
                    )
                    .await?;
                }
                ChargebackStatus::Won => {
                    self.emit(
                        EventType::ChargebackWon,
                        json!({
                            "chargeback_id": chargeback.id,
                            "payment_intent_id": chargeback.payment_intent_id,
                            "amount": chargeback.amount,
                        }),
                    )
                    .await?;
                }
                // No event on the intermediate state
                ChargebackStatus::UnderReview | ChargebackStatus::Open => {}
            }

            Ok((StatusCode::OK, serde_json::to_value(&chargeback)?))
        })
        .await
    }
}
