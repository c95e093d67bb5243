//! Ledger and reconciliation endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::LedgerEntryType;
use crate::repos::LedgerFilter;
use crate::routes::{list_query, page_response, parse_time_param, PageParams};
use crate::services::reconciliation_service;
use crate::state::AppState;
use crate::validation::validate_currency;

#[derive(Debug, Default, Deserialize)]
pub struct LedgerListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub payment_intent_id: Option<String>,
    pub entry_type: Option<String>,
    pub currency: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LedgerListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let entry_type = params
        .entry_type
        .as_deref()
        .map(|raw| {
            LedgerEntryType::parse(raw).ok_or_else(|| {
                ApiError::validation("entry_type", format!("unknown entry type '{raw}'"))
            })
        })
        .transpose()?;

    let filter = LedgerFilter {
        payment_intent_id: params.payment_intent_id,
        entry_type,
        currency: params.currency,
        created_from: parse_time_param(&params.created_from, "created_from")?,
        created_to: parse_time_param(&params.created_to, "created_to")?,
    };

    let page = state.repo.list_ledger_entries(&filter, &query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |entry| entry.id.as_str(),
        |entry| serde_json::to_value(entry).unwrap_or_default(),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconciliationParams {
    pub currency: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

pub async fn reconciliation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReconciliationParams>,
) -> ApiResult<Json<JsonValue>> {
    let currency = params
        .currency
        .as_deref()
        .map(validate_currency)
        .transpose()?;
    let summary = reconciliation_service::summarize(
        &state.repo,
        currency,
        parse_time_param(&params.created_from, "created_from")?,
        parse_time_param(&params.created_to, "created_to")?,
    )
    .await?;
    Ok(Json(serde_json::to_value(summary)?))
}
