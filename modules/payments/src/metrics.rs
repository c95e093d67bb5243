//! Prometheus metrics registry

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "payments_http_requests_total",
        "HTTP requests served",
        &["method", "path", "status"]
    )
    .expect("metric registration");
    pub static ref RATE_LIMITED: IntCounter = register_int_counter!(
        "payments_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .expect("metric registration");
    pub static ref EVENTS_PUBLISHED: IntCounter = register_int_counter!(
        "payments_events_published_total",
        "Payment events published to the pipeline"
    )
    .expect("metric registration");
    pub static ref EVENTS_CONSUMED: IntCounterVec = register_int_counter_vec!(
        "payments_events_consumed_total",
        "Payment events consumed from the stream",
        &["result"]
    )
    .expect("metric registration");
    pub static ref WEBHOOK_DELIVERIES: IntCounterVec = register_int_counter_vec!(
        "payments_webhook_deliveries_total",
        "Webhook delivery attempts",
        &["outcome"]
    )
    .expect("metric registration");
    pub static ref WEBHOOK_DEAD_LETTERS: IntCounter = register_int_counter!(
        "payments_webhook_dead_letters_total",
        "Webhook deliveries moved to the dead letter queue"
    )
    .expect("metric registration");
}

/// Render the default registry in the Prometheus text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_counters() {
        RATE_LIMITED.inc();
        let text = render();
        assert!(text.contains("payments_rate_limited_total"));
    }
}
