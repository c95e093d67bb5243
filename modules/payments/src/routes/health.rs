//! Health probes and metrics exposition

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::metrics as service_metrics;
use crate::state::AppState;

pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = match &state.pool {
        Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
        // In-memory backends have nothing external to probe
        None => true,
    };

    let status = if store_ok { "ok" } else { "unavailable" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "checks": { "store": store_ok },
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        service_metrics::render(),
    )
}
