//! Provider gateways and routing
//!
//! A gateway fronts one acquirer; the router orders candidates per payment
//! method and gates them through a per-provider circuit breaker.

pub mod http_gateway;
pub mod router;

pub use http_gateway::HttpProviderGateway;
pub use router::{CircuitBreaker, ProviderRouter};

use async_trait::async_trait;

use crate::models::PaymentMethodType;

/// Failure codes treated as transient: they trigger failover to the next
/// candidate and count toward the circuit breaker
pub const TRANSIENT_FAILURE_CODES: [&str; 3] = [
    "provider_unavailable",
    "transient_network_error",
    "timeout",
];

pub fn is_transient_failure(code: &str) -> bool {
    TRANSIENT_FAILURE_CODES.contains(&code)
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub amount: i64,
    pub currency: String,
    pub payment_method_type: PaymentMethodType,
    pub payment_method_token: String,
}

/// Outcome of a provider call; failures are in-band so the router can apply
/// breaker bookkeeping and failover uniformly
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub ok: bool,
    pub reference: Option<String>,
    pub failure_code: Option<String>,
}

impl ProviderResponse {
    pub fn approved(reference: impl Into<String>) -> Self {
        Self {
            ok: true,
            reference: Some(reference.into()),
            failure_code: None,
        }
    }

    pub fn declined(failure_code: impl Into<String>) -> Self {
        Self {
            ok: false,
            reference: None,
            failure_code: Some(failure_code.into()),
        }
    }

    pub fn is_transient_failure(&self) -> bool {
        self.failure_code
            .as_deref()
            .is_some_and(is_transient_failure)
    }
}

#[async_trait]
pub trait ProviderGateway: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn supports(&self, method: PaymentMethodType) -> bool;

    async fn authorize(&self, request: &AuthorizeRequest) -> ProviderResponse;

    async fn capture(&self, reference: &str, amount: i64, currency: &str) -> ProviderResponse;

    async fn refund(&self, reference: &str, amount: i64, currency: &str) -> ProviderResponse;
}
