//! Payment intent endpoints

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::{IntentStatus, PaymentMethodType};
use crate::repos::IntentFilter;
use crate::routes::{
    completed_response, idempotency_key, list_query, page_response, parse_i64_param,
    parse_json_body, parse_optional_json_body, parse_time_param, validate_path_id, PageParams,
};
use crate::state::AppState;

pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = idempotency_key(&state, &headers)?;
    let payload = parse_json_body(&body)?;
    let completed = state.orchestrator.create_payment_intent(&key, payload).await?;
    Ok(completed_response(&key, completed))
}

pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let payload = parse_optional_json_body(&body)?;
    let completed = state
        .orchestrator
        .confirm_payment_intent(&id, &key, payload)
        .await?;
    Ok(completed_response(&key, completed))
}

pub async fn capture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let payload = parse_optional_json_body(&body)?;
    let completed = state
        .orchestrator
        .capture_payment_intent(&id, &key, payload)
        .await?;
    Ok(completed_response(&key, completed))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let payload = parse_optional_json_body(&body)?;
    let completed = state
        .orchestrator
        .cancel_payment_intent(&id, &key, payload)
        .await?;
    Ok(completed_response(&key, completed))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    validate_path_id(&id, "id")?;
    let intent = state
        .repo
        .get_intent(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("payment intent"))?;
    Ok(Json(intent.to_api()))
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub amount_min: Option<String>,
    pub amount_max: Option<String>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub payment_method_type: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IntentListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let status = params
        .status
        .as_deref()
        .map(|raw| {
            IntentStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", format!("unknown status '{raw}'")))
        })
        .transpose()?;
    let payment_method_type = params
        .payment_method_type
        .as_deref()
        .map(|raw| {
            PaymentMethodType::parse(raw).ok_or_else(|| {
                ApiError::validation(
                    "payment_method_type",
                    format!("unknown payment method '{raw}'"),
                )
            })
        })
        .transpose()?;

    let filter = IntentFilter {
        amount_min: parse_i64_param(&params.amount_min, "amount_min")?,
        amount_max: parse_i64_param(&params.amount_max, "amount_max")?,
        currency: params.currency,
        status,
        customer_id: params.customer_id,
        provider: params.provider,
        provider_reference: params.provider_reference,
        payment_method_type,
        created_from: parse_time_param(&params.created_from, "created_from")?,
        created_to: parse_time_param(&params.created_to, "created_to")?,
    };

    let page = state.repo.list_intents(&filter, &query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |intent| intent.id.as_str(),
        |intent| intent.to_api(),
    ))
}
