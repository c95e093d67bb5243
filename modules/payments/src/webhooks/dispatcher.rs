//! Webhook dispatcher: sign, send, classify, log, dead-letter
//!
//! For each event the dispatcher fans out to every enabled endpoint whose
//! subscription covers the event type, retrying up to `max_attempts` per
//! endpoint. 4xx statuses other than 408/425/429 are permanent: the loop
//! stops immediately. Anything else (5xx, 408/425/429, timeouts, transport
//! errors) is retryable. Exhausted or permanently-failed deliveries become
//! dead letters embedding the full event payload for later replay.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::canonical::canonical_json;
use crate::clock::Clock;
use crate::error::ApiResult;
use crate::events::{EventSubscriber, PaymentEvent};
use crate::metrics;
use crate::models::{
    new_id, DeadLetterReason, DeadLetterStatus, DeliveryStatus, WebhookDeadLetter,
    WebhookDelivery, WebhookEndpoint,
};
use crate::repos::WebhookRepository;
use crate::webhooks::sender::{SendOutcome, WebhookSender};
use crate::webhooks::signature;

/// 4xx responses that are still worth retrying
const RETRYABLE_4XX: [u16; 3] = [408, 425, 429];

pub fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && !RETRYABLE_4XX.contains(&status)
}

/// One signed delivery attempt, already persisted to the delivery log
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub ok: bool,
    pub permanent: bool,
    pub response_status: Option<u16>,
    pub error_code: Option<String>,
}

pub struct WebhookDispatcher {
    repo: Arc<dyn WebhookRepository>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl WebhookDispatcher {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        sender: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            repo,
            sender,
            clock,
            max_attempts,
        }
    }

    /// Sign and send one attempt, recording it in the delivery log
    pub async fn attempt(
        &self,
        endpoint_id: &str,
        url: &str,
        secret: &str,
        event_id: &str,
        event_type: &str,
        payload: &JsonValue,
        attempt_no: i32,
    ) -> ApiResult<AttemptOutcome> {
        let now = self.clock.now();
        let timestamp = now.to_rfc3339();
        let body = canonical_json(payload);
        let sig = signature::sign(secret, &timestamp, &body);

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-PMC-Event".to_string(), event_type.to_string()),
            ("X-PMC-Event-Id".to_string(), event_id.to_string()),
            ("X-PMC-Timestamp".to_string(), timestamp),
            ("X-PMC-Signature".to_string(), sig),
            (
                "X-PMC-Signature-Key-Id".to_string(),
                signature::key_id(secret),
            ),
        ];

        let outcome: SendOutcome = self.sender.send(url, &headers, &body).await;

        let status = if outcome.ok {
            DeliveryStatus::Succeeded
        } else {
            DeliveryStatus::Failed
        };
        self.repo
            .insert_delivery(&WebhookDelivery {
                id: new_id("whd"),
                endpoint_id: endpoint_id.to_string(),
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                attempt: attempt_no,
                status,
                response_status: outcome.response_status,
                error_code: outcome.error_code.clone(),
                created_at: now,
                delivered_at: outcome.ok.then(|| self.clock.now()),
            })
            .await?;

        metrics::WEBHOOK_DELIVERIES
            .with_label_values(&[status.as_str()])
            .inc();

        Ok(AttemptOutcome {
            ok: outcome.ok,
            permanent: outcome
                .response_status
                .is_some_and(is_permanent_status),
            response_status: outcome.response_status,
            error_code: outcome.error_code,
        })
    }

    async fn deliver(&self, endpoint: &WebhookEndpoint, event: &PaymentEvent) -> ApiResult<()> {
        let payload = serde_json::to_value(event)?;
        let event_type = event.event_type.as_str();

        let mut attempts = 0;
        let mut last: Option<AttemptOutcome> = None;
        while attempts < self.max_attempts {
            attempts += 1;
            let outcome = self
                .attempt(
                    &endpoint.id,
                    &endpoint.url,
                    &endpoint.secret,
                    &event.id,
                    event_type,
                    &payload,
                    attempts as i32,
                )
                .await?;

            if outcome.ok {
                tracing::info!(
                    endpoint_id = %endpoint.id,
                    event_id = %event.id,
                    attempt = attempts,
                    "webhook delivered"
                );
                return Ok(());
            }
            let permanent = outcome.permanent;
            last = Some(outcome);
            if permanent {
                break;
            }
        }

        let Some(last) = last else {
            return Ok(());
        };
        let failure_reason = if last.permanent {
            DeadLetterReason::PermanentFailure
        } else {
            DeadLetterReason::MaxAttemptsExhausted
        };
        let dead_letter = WebhookDeadLetter {
            id: new_id("dl"),
            endpoint_id: endpoint.id.clone(),
            endpoint_url: endpoint.url.clone(),
            event_id: event.id.clone(),
            event_type: event_type.to_string(),
            attempts: attempts as i32,
            status: DeadLetterStatus::Pending,
            replay_count: 0,
            failure_reason,
            response_status: last.response_status,
            error_code: last.error_code,
            event_payload: payload,
            failed_at: self.clock.now(),
            last_replayed_at: None,
        };
        self.repo.insert_dead_letter(&dead_letter).await?;
        metrics::WEBHOOK_DEAD_LETTERS.inc();
        tracing::error!(
            endpoint_id = %endpoint.id,
            event_id = %event.id,
            attempts = attempts,
            failure_reason = %failure_reason.as_str(),
            "webhook moved to dead letter queue"
        );
        Ok(())
    }

    pub async fn dispatch(&self, event: &PaymentEvent) -> ApiResult<()> {
        let endpoints = self
            .repo
            .endpoints_for_event(event.event_type.as_str())
            .await?;
        for endpoint in endpoints {
            self.deliver(&endpoint, event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for WebhookDispatcher {
    fn name(&self) -> &str {
        "webhook-dispatcher"
    }

    async fn on_event(&self, event: &PaymentEvent) -> anyhow::Result<()> {
        self.dispatch(event)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_retry_policy() {
        assert!(is_permanent_status(400));
        assert!(is_permanent_status(404));
        assert!(is_permanent_status(410));
        assert!(!is_permanent_status(408));
        assert!(!is_permanent_status(425));
        assert!(!is_permanent_status(429));
        assert!(!is_permanent_status(500));
        assert!(!is_permanent_status(503));
        assert!(!is_permanent_status(200));
    }
}
