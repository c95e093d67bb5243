//! Webhook endpoint, delivery, and dead-letter endpoints

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::{DeadLetterStatus, DeliveryStatus, WebhookEndpoint};
use crate::repos::{DeadLetterFilter, DeliveryFilter};
use crate::routes::{
    idempotency_key, list_query, page_response, parse_json_body, validate_path_id,
    with_idempotency_echo, PageParams,
};
use crate::services::webhook_service::{
    endpoint_etag, CreateEndpointRequest, IfMatch, ReplayBatchRequest, UpdateEndpointRequest,
};
use crate::state::AppState;

fn if_match(headers: &HeaderMap) -> ApiResult<Option<IfMatch>> {
    match headers.get("If-Match") {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::invalid_if_match())?;
            IfMatch::parse(raw).map(Some)
        }
    }
}

fn endpoint_response(
    status: StatusCode,
    endpoint: &WebhookEndpoint,
    include_secret: bool,
) -> Response {
    let etag = endpoint_etag(endpoint);
    let mut response = (status, Json(endpoint.to_api(include_secret))).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
        response.headers_mut().insert("ETag", value);
    }
    response
}

pub async fn create_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = idempotency_key(&state, &headers)?;
    let request: CreateEndpointRequest = serde_json::from_value(parse_json_body(&body)?)
        .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;
    let endpoint = state.webhook_service.create_endpoint(request).await?;
    // The signing secret is only revealed on creation and rotation
    Ok(with_idempotency_echo(
        endpoint_response(StatusCode::CREATED, &endpoint, true),
        &key,
    ))
}

pub async fn get_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let endpoint = state.webhook_service.get_endpoint(&id).await?;
    Ok(endpoint_response(StatusCode::OK, &endpoint, false))
}

pub async fn update_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let precondition = if_match(&headers)?;
    let request: UpdateEndpointRequest = serde_json::from_value(parse_json_body(&body)?)
        .map_err(|e| ApiError::invalid_request_body(e.to_string()))?;
    let endpoint = state
        .webhook_service
        .update_endpoint(&id, request, precondition)
        .await?;
    Ok(with_idempotency_echo(
        endpoint_response(StatusCode::OK, &endpoint, false),
        &key,
    ))
}

pub async fn rotate_secret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let precondition = if_match(&headers)?;
    let endpoint = state
        .webhook_service
        .rotate_secret(&id, precondition)
        .await?;
    Ok(with_idempotency_echo(
        endpoint_response(StatusCode::OK, &endpoint, true),
        &key,
    ))
}

pub async fn list_endpoints(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params)?;
    let page = state.webhook_repo.list_endpoints(&query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |endpoint| endpoint.id.as_str(),
        |endpoint| endpoint.to_api(false),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub endpoint_id: Option<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub status: Option<String>,
}

pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeliveryListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let status = params
        .status
        .as_deref()
        .map(|raw| {
            DeliveryStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let filter = DeliveryFilter {
        endpoint_id: params.endpoint_id,
        event_id: params.event_id,
        event_type: params.event_type,
        status,
    };
    let page = state.webhook_repo.list_deliveries(&filter, &query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |delivery| delivery.id.as_str(),
        |delivery| serde_json::to_value(delivery).unwrap_or_default(),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub endpoint_id: Option<String>,
}

pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLetterListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let status = params
        .status
        .as_deref()
        .map(|raw| {
            DeadLetterStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let filter = DeadLetterFilter {
        status,
        event_type: params.event_type,
        endpoint_id: params.endpoint_id,
    };
    let page = state
        .webhook_repo
        .list_dead_letters(&filter, &query)
        .await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |dead_letter| dead_letter.id.as_str(),
        |dead_letter| serde_json::to_value(dead_letter).unwrap_or_default(),
    ))
}

pub async fn get_dead_letter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    validate_path_id(&id, "id")?;
    let dead_letter = state
        .webhook_repo
        .get_dead_letter(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("webhook dead letter"))?;
    Ok(Json(serde_json::to_value(dead_letter)?))
}

pub async fn replay_dead_letter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    validate_path_id(&id, "id")?;
    let key = idempotency_key(&state, &headers)?;
    let dead_letter = state.webhook_service.replay(&id).await?;
    let response = Json(serde_json::to_value(dead_letter)?).into_response();
    Ok(with_idempotency_echo(response, &key))
}

pub async fn replay_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let key = idempotency_key(&state, &headers)?;
    let request: ReplayBatchRequest = serde_json::from_value(parse_json_body(&body)?).map_err(|e| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_replay_batch",
            e.to_string(),
        )
    })?;
    let report = state.webhook_service.replay_batch(request).await?;
    Ok(with_idempotency_echo(Json(report).into_response(), &key))
}
