//! Refund endpoints

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::RefundStatus;
use crate::repos::RefundFilter;
use crate::routes::{
    completed_response, idempotency_key, list_query, page_response, parse_i64_param,
    parse_json_body, parse_time_param, PageParams,
};
use crate::state::AppState;

pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = idempotency_key(&state, &headers)?;
    let payload = parse_json_body(&body)?;
    let completed = state.orchestrator.create_refund(&key, payload).await?;
    Ok(completed_response(&key, completed))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub amount_min: Option<String>,
    pub amount_max: Option<String>,
    pub payment_intent_id: Option<String>,
    pub status: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefundListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let status = params
        .status
        .as_deref()
        .map(|raw| {
            RefundStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let filter = RefundFilter {
        amount_min: parse_i64_param(&params.amount_min, "amount_min")?,
        amount_max: parse_i64_param(&params.amount_max, "amount_max")?,
        payment_intent_id: params.payment_intent_id,
        status,
        created_from: parse_time_param(&params.created_from, "created_from")?,
        created_to: parse_time_param(&params.created_to, "created_to")?,
    };

    let page = state.repo.list_refunds(&filter, &query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |refund| refund.id.as_str(),
        |refund| serde_json::to_value(refund).unwrap_or_default(),
    ))
}
