//! API error kinds with stable codes and HTTP status mapping
//!
//! Every handler maps failures to the wire envelope
//! `{"error": {"code", "message", "request_id?"}}`. State-machine violations
//! are always 409, never 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    // Authentication

    pub fn missing_api_key() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Authorization header with a bearer API key is required",
        )
    }

    pub fn invalid_api_key() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "The presented API key is not valid",
        )
    }

    // Throttling

    pub fn rate_limit_exceeded() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            "Too many requests for this API key",
        )
    }

    // Request shape

    pub fn invalid_request_body(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_body", message)
    }

    pub fn missing_idempotency_key() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "missing_idempotency_key",
            "Idempotency-Key header is required for write operations",
        )
    }

    pub fn invalid_idempotency_key(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_idempotency_key",
            message,
        )
    }

    pub fn invalid_path_parameter(name: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_path_parameter",
            format!("Path parameter `{name}` is malformed"),
        )
    }

    /// Field-level validation failure: code `invalid_<field>`, 422
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid_{field}"),
            message,
        )
    }

    pub fn invalid_cursor() -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_cursor",
            "The pagination cursor is malformed, tampered with, or does not match the current filters",
        )
    }

    pub fn invalid_if_match() -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_if_match",
            "If-Match must be `*` or a quoted entity tag",
        )
    }

    // Idempotency / concurrency

    pub fn idempotency_conflict() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "idempotency_conflict",
            "Idempotency key was reused with a different request payload",
        )
    }

    pub fn precondition_failed() -> Self {
        Self::new(
            StatusCode::PRECONDITION_FAILED,
            "precondition_failed",
            "The resource was modified; refresh the ETag and retry",
        )
    }

    // State

    pub fn invalid_state_transition(from: &str, to: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "invalid_state_transition",
            format!("Cannot transition payment intent from `{from}` to `{to}`"),
        )
    }

    pub fn invalid_payment_state(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "invalid_payment_state", message)
    }

    pub fn invalid_chargeback_state(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "invalid_chargeback_state", message)
    }

    pub fn invalid_capture_method() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "invalid_capture_method",
            "Capture is only valid for manual-capture payment intents",
        )
    }

    pub fn missing_provider_reference() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "missing_provider_reference",
            "The payment intent has no provider reference from a successful authorization",
        )
    }

    pub fn dead_letter_already_replayed() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "dead_letter_already_replayed",
            "This dead letter was already replayed",
        )
    }

    pub fn webhook_endpoint_disabled() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "webhook_endpoint_disabled",
            "The webhook endpoint is disabled",
        )
    }

    // Business constraints

    pub fn amount_exceeds_capturable(capturable: i64) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "amount_exceeds_capturable",
            format!("Capture amount exceeds the capturable balance of {capturable}"),
        )
    }

    pub fn amount_exceeds_refundable(refundable: i64) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "amount_exceeds_refundable",
            format!("Refund amount exceeds the refundable balance of {refundable}"),
        )
    }

    pub fn amount_exceeds_disputable(disputable: i64) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "amount_exceeds_disputable",
            format!("Chargeback amount exceeds the disputable balance of {disputable}"),
        )
    }

    pub fn refund_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "refund_not_allowed", message)
    }

    // Resources

    pub fn not_found(resource: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "resource_not_found",
            format!("{resource} not found"),
        )
    }

    // Capacity

    pub fn provider_not_available() -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "provider_not_available",
            "No configured provider supports this payment method",
        )
    }

    pub fn provider_circuit_open() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "provider_circuit_open",
            "All candidate providers are temporarily unavailable",
        )
    }

    // Internal

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            // Internal failures carry an opaque correlation id for support
            error["request_id"] =
                serde_json::Value::String(crate::models::new_id("req"));
            tracing::error!(code = %self.code, message = %self.message, "internal error");
        }
        (self.status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::internal(format!("database error: {e}"))
    }
}

impl From<event_bus::BusError> for ApiError {
    fn from(e: event_bus::BusError) -> Self {
        ApiError::internal(format!("event stream error: {e}"))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::internal(format!("serialization error: {e}"))
    }
}
