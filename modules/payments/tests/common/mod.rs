//! Shared test harness: in-memory backends, scripted provider gateways, and
//! a scripted webhook sender
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use payments_rs::clock::{Clock, ManualClock};
use payments_rs::config::Config;
use payments_rs::cursor::CursorSigner;
use payments_rs::events::{EventPipeline, InMemoryEventPipeline};
use payments_rs::idempotency::InMemoryIdempotencyStore;
use payments_rs::models::PaymentMethodType;
use payments_rs::providers::{
    AuthorizeRequest, CircuitBreaker, ProviderGateway, ProviderResponse, ProviderRouter,
};
use payments_rs::repos::{InMemoryPaymentRepository, InMemoryWebhookRepository};
use payments_rs::risk::RiskEngine;
use payments_rs::services::{PaymentOrchestrator, WebhookService};
use payments_rs::webhooks::{SendOutcome, WebhookDispatcher, WebhookSender};

/// Gateway with the reference mock-provider behavior: outcomes are driven by
/// the payment method token
#[derive(Debug)]
pub struct ScriptedGateway {
    pub name: String,
}

impl ScriptedGateway {
    pub fn new(name: &str) -> Arc<dyn ProviderGateway> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _method: PaymentMethodType) -> bool {
        true
    }

    async fn authorize(&self, request: &AuthorizeRequest) -> ProviderResponse {
        let token = request.payment_method_token.as_str();
        if token.starts_with("tok_test_transient") && self.name == "provider_b" {
            return ProviderResponse::declined("transient_network_error");
        }
        if token.starts_with("tok_timeout") {
            return ProviderResponse::declined("timeout");
        }
        if token.starts_with("tok_decline") {
            return ProviderResponse::declined("card_declined");
        }
        ProviderResponse::approved(format!("auth_{}_1", self.name))
    }

    async fn capture(&self, reference: &str, _amount: i64, _currency: &str) -> ProviderResponse {
        if reference.contains("capture_fail") {
            return ProviderResponse::declined("capture_failed");
        }
        ProviderResponse::approved(format!("cap_{}", self.name))
    }

    async fn refund(&self, reference: &str, _amount: i64, _currency: &str) -> ProviderResponse {
        if reference.contains("refund_fail") {
            return ProviderResponse::declined("refund_rejected");
        }
        ProviderResponse::approved(format!("ref_{}", self.name))
    }
}

#[derive(Debug, Clone)]
pub struct SentWebhook {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Webhook sender with per-url scripted outcomes; unknown urls succeed
#[derive(Default)]
pub struct ScriptedSender {
    outcomes: Mutex<HashMap<String, SendOutcome>>,
    pub sent: Mutex<Vec<SentWebhook>>,
}

impl ScriptedSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, outcome: SendOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(url.to_string(), outcome);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookSender for ScriptedSender {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &str) -> SendOutcome {
        self.sent.lock().unwrap().push(SentWebhook {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.to_string(),
        });
        self.outcomes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| SendOutcome::status(200))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub repo: Arc<InMemoryPaymentRepository>,
    pub webhook_repo: Arc<InMemoryWebhookRepository>,
    pub pipeline: Arc<InMemoryEventPipeline>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub webhook_service: Arc<WebhookService>,
    pub sender: Arc<ScriptedSender>,
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        store_type: "inmemory".into(),
        database_url: None,
        bus_type: "inmemory".into(),
        nats_url: String::new(),
        nats_stream: "PAYMENTS_EVENTS".into(),
        nats_subject: "payments.events".into(),
        consumer_group: "payments-service".into(),
        event_batch_size: 10,
        event_block_ms: 10,
        consumer_max_attempts: 1,
        api_keys: vec!["sk_test_key".into()],
        cursor_secrets: vec!["cursor-secret-1".into()],
        rate_limit_window_seconds: 60,
        rate_limit_max_requests: 1000,
        idempotency_ttl_seconds: 86_400,
        idempotency_key_max_length: 255,
        webhook_max_attempts: 3,
        webhook_timeout_ms: 1000,
        provider_timeout_ms: 1000,
        breaker_threshold: 5,
        breaker_cooldown_seconds: 30,
        breaker_transient_only: true,
        default_provider: "provider_a".into(),
        provider_endpoints: HashMap::new(),
        provider_priorities: HashMap::from([(
            PaymentMethodType::Card,
            vec!["provider_b".to_string(), "provider_a".to_string()],
        )]),
        risk_review_amount_threshold: 1_000_000,
        default_page_limit: 50,
    }
}

pub fn harness() -> Harness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: Config) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repo = Arc::new(InMemoryPaymentRepository::new());
    let webhook_repo = Arc::new(InMemoryWebhookRepository::new());
    let pipeline = Arc::new(InMemoryEventPipeline::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new(
        config.idempotency_ttl_seconds,
        clock.clone() as Arc<dyn Clock>,
    ));

    let router = Arc::new(ProviderRouter::new(
        vec![
            ScriptedGateway::new("provider_a"),
            ScriptedGateway::new("provider_b"),
        ],
        config.provider_priorities.clone(),
        config.default_provider.clone(),
        CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown_seconds,
            config.breaker_transient_only,
            clock.clone() as Arc<dyn Clock>,
        ),
    ));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        repo.clone(),
        idempotency,
        pipeline.clone(),
        router,
        RiskEngine::new(config.risk_review_amount_threshold),
        clock.clone() as Arc<dyn Clock>,
    ));

    let sender = ScriptedSender::new();
    let dispatcher = Arc::new(WebhookDispatcher::new(
        webhook_repo.clone(),
        sender.clone(),
        clock.clone() as Arc<dyn Clock>,
        config.webhook_max_attempts,
    ));
    pipeline.subscribe(dispatcher.clone());

    let webhook_service = Arc::new(WebhookService::new(
        webhook_repo.clone(),
        dispatcher.clone(),
        clock.clone() as Arc<dyn Clock>,
    ));

    Harness {
        clock,
        repo,
        webhook_repo,
        pipeline,
        orchestrator,
        dispatcher,
        webhook_service,
        sender,
    }
}

/// Signer matching the harness cursor secret, for request building
pub fn cursor_signer() -> CursorSigner {
    CursorSigner::new(&["cursor-secret-1".to_string()])
}

/// The S1 request body
pub fn intent_body(amount: i64, token: &str, capture_method: &str) -> serde_json::Value {
    serde_json::json!({
        "amount": amount,
        "currency": "BRL",
        "customer": {"id": "cus_123"},
        "payment_method": {"type": "card", "token": token},
        "capture_method": capture_method,
    })
}
