//! Postgres outbox/inbox backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::error::{ApiError, ApiResult};
use crate::events::envelope::{EventFilter, EventType, PaymentEvent};
use crate::events::store::EventStore;
use crate::repos::{ListQuery, Page};

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type OutboxRow = (
    String,
    String,
    String,
    String,
    i32,
    DateTime<Utc>,
    JsonValue,
);

const OUTBOX_COLUMNS: &str =
    "event_id, event_type, api_version, source, event_version, occurred_at, payload";

const OUTBOX_FILTER_SQL: &str = r#"
      published_at IS NOT NULL
  AND ($1::text IS NULL OR payload->>'payment_intent_id' = $1)
  AND ($2::text IS NULL OR event_type = $2)
  AND ($3::timestamptz IS NULL OR occurred_at >= $3)
  AND ($4::timestamptz IS NULL OR occurred_at <= $4)
"#;

type PgQueryAs<'q, O> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>;

fn bind_event_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &EventFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.payment_intent_id.clone())
        .bind(filter.event_type.map(|t| t.as_str().to_string()))
        .bind(filter.occurred_from)
        .bind(filter.occurred_to)
}

fn event_from_row(row: OutboxRow) -> ApiResult<PaymentEvent> {
    let event_type = EventType::parse(&row.1)
        .ok_or_else(|| ApiError::internal(format!("stored event type '{}'", row.1)))?;
    Ok(PaymentEvent {
        id: row.0,
        event_type,
        api_version: row.2,
        source: row.3,
        event_version: row.4,
        occurred_at: row.5,
        data: row.6,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn outbox_insert(&self, event: &PaymentEvent) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events_outbox
                (event_id, event_type, api_version, source, event_version,
                 occurred_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(event.event_type.as_str())
        .bind(&event.api_version)
        .bind(&event.source)
        .bind(event.event_version)
        .bind(event.occurred_at)
        .bind(&event.data)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn outbox_mark_published(
        &self,
        event_id: &str,
        stream_id: &str,
        published_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_events_outbox
            SET stream_id = $1, published_at = $2
            WHERE event_id = $3
            "#,
        )
        .bind(stream_id)
        .bind(published_at)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn outbox_unpublished(&self) -> ApiResult<Vec<PaymentEvent>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM payment_events_outbox
            WHERE published_at IS NULL
            ORDER BY occurred_at ASC, event_id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {OUTBOX_COLUMNS} FROM payment_events_outbox WHERE {OUTBOX_FILTER_SQL} AND event_id = $5"
            );
            let anchor: Option<OutboxRow> =
                bind_event_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM payment_events_outbox
            WHERE {OUTBOX_FILTER_SQL}
              AND ($5::text IS NULL OR (occurred_at, event_id) <
                   (SELECT occurred_at, event_id FROM payment_events_outbox WHERE event_id = $5))
            ORDER BY occurred_at DESC, event_id DESC
            LIMIT $6
            "#
        );
        let rows: Vec<OutboxRow> = bind_event_filter(sqlx::query_as(&page_sql), filter)
            .bind(query.after_id.clone())
            .bind(query.limit + 1)
            .fetch_all(&self.pool)
            .await?;

        let mut events = rows
            .into_iter()
            .map(event_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        let has_more = events.len() as i64 > query.limit;
        events.truncate(query.limit.max(0) as usize);
        Ok(Page {
            items: events,
            has_more,
        })
    }

    async fn inbox_insert(&self, group: &str, event_id: &str) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events_inbox (consumer_group, event_id, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer_group, event_id) DO NOTHING
            "#,
        )
        .bind(group)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn inbox_delete(&self, group: &str, event_id: &str) -> ApiResult<()> {
        sqlx::query(
            "DELETE FROM payment_events_inbox WHERE consumer_group = $1 AND event_id = $2",
        )
        .bind(group)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
