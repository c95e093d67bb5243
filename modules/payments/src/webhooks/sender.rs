//! Webhook HTTP sender port

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub ok: bool,
    pub response_status: Option<u16>,
    pub error_code: Option<String>,
}

impl SendOutcome {
    pub fn status(status: u16) -> Self {
        Self {
            ok: (200..300).contains(&status),
            response_status: Some(status),
            error_code: None,
        }
    }

    pub fn transport_error(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            response_status: None,
            error_code: Some(code.into()),
        }
    }
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &str) -> SendOutcome;
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &str) -> SendOutcome {
        let mut request = self.client.post(url).body(body.to_string());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) => SendOutcome::status(response.status().as_u16()),
            Err(e) if e.is_timeout() => SendOutcome::transport_error("timeout"),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "webhook send failed");
                SendOutcome::transport_error("network_error")
            }
        }
    }
}
