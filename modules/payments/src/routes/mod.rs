//! HTTP surface: route table and shared handler plumbing

pub mod chargebacks;
pub mod health;
pub mod ledger;
pub mod payment_events;
pub mod payment_intents;
pub mod refunds;
pub mod webhooks;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth, request_id, track_requests};
use crate::repos::{ListQuery, Page};
use crate::services::Completed;
use crate::state::AppState;
use crate::validation::{
    cursor_token_shape_ok, parse_timestamp, validate_idempotency_key, validate_limit,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1/payment-intents",
            post(payment_intents::create).get(payment_intents::list),
        )
        .route("/v1/payment-intents/{id}", get(payment_intents::get_one))
        .route(
            "/v1/payment-intents/{id}/confirm",
            post(payment_intents::confirm),
        )
        .route(
            "/v1/payment-intents/{id}/capture",
            post(payment_intents::capture),
        )
        .route(
            "/v1/payment-intents/{id}/cancel",
            post(payment_intents::cancel),
        )
        .route("/v1/refunds", post(refunds::create).get(refunds::list))
        .route(
            "/v1/chargebacks",
            post(chargebacks::create).get(chargebacks::list),
        )
        .route(
            "/v1/chargebacks/{id}/resolve",
            post(chargebacks::resolve),
        )
        .route("/v1/ledger-entries", get(ledger::list))
        .route("/v1/reconciliation/summary", get(ledger::reconciliation))
        .route("/v1/payment-events", get(payment_events::list))
        .route(
            "/v1/webhook-endpoints",
            post(webhooks::create_endpoint).get(webhooks::list_endpoints),
        )
        .route(
            "/v1/webhook-endpoints/{id}",
            get(webhooks::get_endpoint).patch(webhooks::update_endpoint),
        )
        .route(
            "/v1/webhook-endpoints/{id}/rotate-secret",
            post(webhooks::rotate_secret),
        )
        .route("/v1/webhook-deliveries", get(webhooks::list_deliveries))
        .route(
            "/v1/webhook-dead-letters",
            get(webhooks::list_dead_letters),
        )
        .route(
            "/v1/webhook-dead-letters/{id}",
            get(webhooks::get_dead_letter),
        )
        .route(
            "/v1/webhook-dead-letters/{id}/replay",
            post(webhooks::replay_dead_letter),
        )
        .route(
            "/v1/webhook-dead-letters/replay-batch",
            post(webhooks::replay_batch),
        )
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .layer(axum_middleware::from_fn(track_requests))
        .layer(axum_middleware::from_fn(request_id))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Query parameters common to every listing
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

/// Decode limit + cursor into a repository query
pub(crate) fn list_query(state: &AppState, params: &PageParams) -> ApiResult<ListQuery> {
    let limit = match &params.limit {
        None => state.config.default_page_limit,
        Some(raw) => {
            let parsed: i64 = raw
                .parse()
                .map_err(|_| ApiError::validation("limit", "must be an integer"))?;
            validate_limit(Some(parsed), state.config.default_page_limit)?
        }
    };

    let after_id = match &params.cursor {
        None => None,
        Some(token) => {
            if !cursor_token_shape_ok(token) {
                return Err(ApiError::invalid_cursor());
            }
            Some(state.cursor.decode(token)?)
        }
    };

    Ok(ListQuery { limit, after_id })
}

/// Standard listing envelope with a signed next_cursor
pub(crate) fn page_response<T>(
    state: &AppState,
    query: &ListQuery,
    page: Page<T>,
    id_of: impl Fn(&T) -> &str,
    to_json: impl Fn(&T) -> JsonValue,
) -> Json<JsonValue> {
    let next_cursor = if page.has_more {
        page.items.last().map(|item| state.cursor.encode(id_of(item)))
    } else {
        None
    };
    let data: Vec<JsonValue> = page.items.iter().map(to_json).collect();
    Json(json!({
        "data": data,
        "pagination": {
            "limit": query.limit,
            "has_more": page.has_more,
            "next_cursor": next_cursor,
        }
    }))
}

/// Parse a required JSON request body into the envelope error on failure
pub(crate) fn parse_json_body(bytes: &axum::body::Bytes) -> ApiResult<JsonValue> {
    if bytes.is_empty() {
        return Err(ApiError::invalid_request_body("request body is required"));
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::invalid_request_body(e.to_string()))
}

/// Parse an optional JSON request body; absent bodies become `null`
pub(crate) fn parse_optional_json_body(bytes: &axum::body::Bytes) -> ApiResult<JsonValue> {
    if bytes.is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::invalid_request_body(e.to_string()))
}

/// Extract and validate the `Idempotency-Key` header
pub(crate) fn idempotency_key(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let key = headers
        .get("Idempotency-Key")
        .ok_or_else(ApiError::missing_idempotency_key)?
        .to_str()
        .map_err(|_| ApiError::invalid_idempotency_key("Idempotency-Key is not valid ASCII"))?
        .to_string();
    validate_idempotency_key(&key, state.config.idempotency_key_max_length)?;
    Ok(key)
}

/// Render a completed idempotent write with the contract headers
pub(crate) fn completed_response(key: &str, completed: Completed) -> Response {
    let status =
        StatusCode::from_u16(completed.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(completed.body)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert("Idempotency-Key", value);
    }
    headers.insert(
        "X-Idempotency-Replayed",
        HeaderValue::from_static(if completed.replayed { "true" } else { "false" }),
    );
    response
}

/// Contract headers for writes that are idempotent by construction (endpoint
/// CRUD guarded by ETags, replay guarded by dead-letter state) rather than
/// through the idempotency store
pub(crate) fn with_idempotency_echo(mut response: Response, key: &str) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert("Idempotency-Key", value);
    }
    headers.insert(
        "X-Idempotency-Replayed",
        HeaderValue::from_static("false"),
    );
    response
}

const PATH_ID_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._:-";

pub(crate) fn validate_path_id(id: &str, name: &str) -> ApiResult<()> {
    if id.is_empty() || !id.chars().all(|c| PATH_ID_CHARS.contains(c)) {
        return Err(ApiError::invalid_path_parameter(name));
    }
    Ok(())
}

pub(crate) fn parse_i64_param(raw: &Option<String>, field: &str) -> ApiResult<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ApiError::validation(field, "must be an integer")),
    }
}

pub(crate) fn parse_time_param(
    raw: &Option<String>,
    field: &str,
) -> ApiResult<Option<DateTime<Utc>>> {
    match raw {
        None => Ok(None),
        Some(value) => parse_timestamp(value, field).map(Some),
    }
}
