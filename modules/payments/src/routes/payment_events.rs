//! Published event listing

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventFilter, EventType};
use crate::routes::{list_query, page_response, parse_time_param, PageParams};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventListParams {
    #[serde(flatten)]
    pub page: PageParams,
    pub payment_intent_id: Option<String>,
    pub event_type: Option<String>,
    pub occurred_from: Option<String>,
    pub occurred_to: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventListParams>,
) -> ApiResult<Json<JsonValue>> {
    let query = list_query(&state, &params.page)?;

    let event_type = params
        .event_type
        .as_deref()
        .map(|raw| {
            EventType::parse(raw).ok_or_else(|| {
                ApiError::validation("event_type", format!("unknown event type '{raw}'"))
            })
        })
        .transpose()?;

    let filter = EventFilter {
        payment_intent_id: params.payment_intent_id,
        event_type,
        occurred_from: parse_time_param(&params.occurred_from, "occurred_from")?,
        occurred_to: parse_time_param(&params.occurred_to, "occurred_to")?,
    };

    let page = state.pipeline.list_published(&filter, &query).await?;
    Ok(page_response(
        &state,
        &query,
        page,
        |event| event.id.as_str(),
        |event| serde_json::to_value(event).unwrap_or_default(),
    ))
}
