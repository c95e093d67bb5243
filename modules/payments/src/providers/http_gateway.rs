//! HTTP adapter for an external payment provider
//!
//! Speaks a minimal JSON protocol: `POST {base}/authorize`, `/capture`,
//! `/refund`. Network-level failures map onto the transient failure codes so
//! the router can fail over and the breaker can count them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::PaymentMethodType;
use crate::providers::{AuthorizeRequest, ProviderGateway, ProviderResponse};

#[derive(Debug, Serialize)]
struct AuthorizeBody<'a> {
    amount: i64,
    currency: &'a str,
    payment_method_type: &'a str,
    payment_method_token: &'a str,
}

#[derive(Debug, Serialize)]
struct MovementBody<'a> {
    reference: &'a str,
    amount: i64,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayReply {
    approved: bool,
    reference: Option<String>,
    failure_code: Option<String>,
}

#[derive(Debug)]
pub struct HttpProviderGateway {
    name: String,
    base_url: String,
    /// Supported methods; empty means all
    methods: Vec<PaymentMethodType>,
    client: reqwest::Client,
}

impl HttpProviderGateway {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        methods: Vec<PaymentMethodType>,
        timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            base_url: base_url.into(),
            methods,
            client,
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> ProviderResponse {
        let url = format!("{}{}", self.base_url, path);
        let result = self.client.post(&url).json(body).send().await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ProviderResponse::declined("timeout"),
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "provider unreachable");
                return ProviderResponse::declined("transient_network_error");
            }
        };

        if response.status().is_server_error() {
            return ProviderResponse::declined("provider_unavailable");
        }

        match response.json::<GatewayReply>().await {
            Ok(reply) if reply.approved => ProviderResponse {
                ok: true,
                reference: reply.reference,
                failure_code: None,
            },
            Ok(reply) => ProviderResponse::declined(
                reply.failure_code.unwrap_or_else(|| "provider_rejected".to_string()),
            ),
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "malformed provider reply");
                ProviderResponse::declined("provider_unavailable")
            }
        }
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, method: PaymentMethodType) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }

    async fn authorize(&self, request: &AuthorizeRequest) -> ProviderResponse {
        self.post(
            "/authorize",
            &AuthorizeBody {
                amount: request.amount,
                currency: &request.currency,
                payment_method_type: request.payment_method_type.as_str(),
                payment_method_token: &request.payment_method_token,
            },
        )
        .await
    }

    async fn capture(&self, reference: &str, amount: i64, currency: &str) -> ProviderResponse {
        self.post(
            "/capture",
            &MovementBody {
                reference,
                amount,
                currency,
            },
        )
        .await
    }

    async fn refund(&self, reference: &str, amount: i64, currency: &str) -> ProviderResponse {
        self.post(
            "/refund",
            &MovementBody {
                reference,
                amount,
                currency,
            },
        )
        .await
    }
}
