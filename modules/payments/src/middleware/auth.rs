//! Bearer authentication and per-key rate limiting
//!
//! Health probes and the metrics endpoint are public; everything else
//! requires a configured API key. Authenticated responses carry
//! `RateLimit-Limit` / `RateLimit-Remaining` / `RateLimit-Reset`, and 429
//! responses add `Retry-After`.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::error::ApiError;
use crate::metrics;
use crate::rate_limit::{api_key_identity, RateLimitDecision};
use crate::state::AppState;

fn is_public(path: &str) -> bool {
    path.starts_with("/health/") || path == "/metrics"
}

fn bearer_token(request: &Request) -> Result<&str, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(ApiError::missing_api_key)?;
    let value = header.to_str().map_err(|_| ApiError::invalid_api_key())?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(ApiError::missing_api_key)
}

fn apply_rate_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(
        "RateLimit-Limit",
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        "RateLimit-Remaining",
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        "RateLimit-Reset",
        HeaderValue::from(decision.reset_seconds),
    );
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let token = match bearer_token(&request) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };
    if !state.config.api_keys.iter().any(|key| key == token) {
        return ApiError::invalid_api_key().into_response();
    }

    let identity = api_key_identity(token);
    let decision = match state.rate_limiter.check(&identity).await {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    if !decision.allowed {
        metrics::RATE_LIMITED.inc();
        let mut response = ApiError::rate_limit_exceeded().into_response();
        apply_rate_headers(&mut response, &decision);
        response.headers_mut().insert(
            "Retry-After",
            HeaderValue::from(decision.retry_after_seconds),
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(&mut response, &decision);
    response
}
