//! Postgres repository backends (sqlx)
//!
//! Listings use keyset pagination over `(created_at, id)` descending. When a
//! cursor is present the anchor row must exist inside the currently-filtered
//! window, otherwise the cursor is rejected; page rows are those strictly
//! after the anchor in sort order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    CaptureMethod, Chargeback, ChargebackReason, ChargebackStatus, DeadLetterReason,
    DeadLetterStatus, DeliveryStatus, IntentStatus, LedgerDirection, LedgerEntry,
    LedgerEntryType, PaymentIntent, PaymentMethodType, Refund, RefundReason, RefundStatus,
    WebhookDeadLetter, WebhookDelivery, WebhookEndpoint,
};
use crate::repos::payment_repo::{
    ChargebackFilter, IntentFilter, LedgerFilter, PaymentRepository, RefundFilter,
};
use crate::repos::webhook_repo::{DeadLetterFilter, DeliveryFilter, WebhookRepository};
use crate::repos::{ListQuery, Page};

type PgQueryAs<'q, O> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>;

fn parse_enum<T>(parsed: Option<T>, what: &str, raw: &str) -> ApiResult<T> {
    parsed.ok_or_else(|| ApiError::internal(format!("stored {what} '{raw}' is not recognized")))
}

fn page_window<T>(mut rows: Vec<T>, limit: i64) -> Page<T> {
    let has_more = rows.len() as i64 > limit;
    rows.truncate(limit.max(0) as usize);
    Page {
        items: rows,
        has_more,
    }
}

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type IntentRow = (
    String,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn intent_from_row(row: IntentRow) -> ApiResult<PaymentIntent> {
    Ok(PaymentIntent {
        id: row.0,
        amount: row.1,
        currency: row.2,
        status: parse_enum(IntentStatus::parse(&row.3), "intent status", &row.3)?,
        capture_method: parse_enum(CaptureMethod::parse(&row.4), "capture method", &row.4)?,
        customer_id: row.5,
        payment_method_type: parse_enum(
            PaymentMethodType::parse(&row.6),
            "payment method",
            &row.6,
        )?,
        payment_method_token: row.7,
        authorized_amount: row.8,
        captured_amount: row.9,
        refunded_amount: row.10,
        provider: row.11,
        provider_reference: row.12,
        created_at: row.13,
        updated_at: row.14,
    })
}

const INTENT_COLUMNS: &str = "id, amount, currency, status, capture_method, customer_id, \
     payment_method_type, payment_method_token, authorized_amount, captured_amount, \
     refunded_amount, provider, provider_reference, created_at, updated_at";

const INTENT_FILTER_SQL: &str = r#"
      ($1::bigint IS NULL OR amount >= $1)
  AND ($2::bigint IS NULL OR amount <= $2)
  AND ($3::text IS NULL OR currency = $3)
  AND ($4::text IS NULL OR status = $4)
  AND ($5::text IS NULL OR customer_id = $5)
  AND ($6::text IS NULL OR provider = $6)
  AND ($7::text IS NULL OR provider_reference = $7)
  AND ($8::text IS NULL OR payment_method_type = $8)
  AND ($9::timestamptz IS NULL OR created_at >= $9)
  AND ($10::timestamptz IS NULL OR created_at <= $10)
"#;

fn bind_intent_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &IntentFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.amount_min)
        .bind(filter.amount_max)
        .bind(filter.currency.clone())
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.customer_id.clone())
        .bind(filter.provider.clone())
        .bind(filter.provider_reference.clone())
        .bind(filter.payment_method_type.map(|m| m.as_str().to_string()))
        .bind(filter.created_from)
        .bind(filter.created_to)
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_intent(&self, intent: &PaymentIntent) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (id, amount, currency, status, capture_method, customer_id,
                 payment_method_type, payment_method_token, authorized_amount,
                 captured_amount, refunded_amount, provider, provider_reference,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&intent.id)
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(intent.status.as_str())
        .bind(intent.capture_method.as_str())
        .bind(&intent.customer_id)
        .bind(intent.payment_method_type.as_str())
        .bind(&intent.payment_method_token)
        .bind(intent.authorized_amount)
        .bind(intent.captured_amount)
        .bind(intent.refunded_amount)
        .bind(&intent.provider)
        .bind(&intent.provider_reference)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> ApiResult<Option<PaymentIntent>> {
        let row: Option<IntentRow> = sqlx::query_as(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(intent_from_row).transpose()
    }

    async fn update_intent(
        &self,
        intent: &PaymentIntent,
        expected_status: IntentStatus,
    ) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = $1, authorized_amount = $2, captured_amount = $3,
                refunded_amount = $4, provider = $5, provider_reference = $6,
                updated_at = $7
            WHERE id = $8 AND status = $9
            "#,
        )
        .bind(intent.status.as_str())
        .bind(intent.authorized_amount)
        .bind(intent.captured_amount)
        .bind(intent.refunded_amount)
        .bind(&intent.provider)
        .bind(&intent.provider_reference)
        .bind(intent.updated_at)
        .bind(&intent.id)
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish a lost race from a missing row
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM payment_intents WHERE id = $1")
                .bind(&intent.id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(ApiError::not_found("payment intent")),
        }
    }

    async fn list_intents(
        &self,
        filter: &IntentFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentIntent>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE {INTENT_FILTER_SQL} AND id = $11"
            );
            let anchor: Option<IntentRow> =
                bind_intent_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {INTENT_COLUMNS} FROM payment_intents
            WHERE {INTENT_FILTER_SQL}
              AND ($11::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM payment_intents WHERE id = $11))
            ORDER BY created_at DESC, id DESC
            LIMIT $12
            "#
        );
        let rows: Vec<IntentRow> = bind_intent_filter(sqlx::query_as(&page_sql), filter)
            .bind(query.after_id.clone())
            .bind(query.limit + 1)
            .fetch_all(&self.pool)
            .await?;

        let intents = rows
            .into_iter()
            .map(intent_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(intents, query.limit))
    }

    async fn insert_refund(&self, refund: &Refund) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds
                (id, payment_intent_id, amount, status, reason, failure_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.payment_intent_id)
        .bind(refund.amount)
        .bind(refund.status.as_str())
        .bind(refund.reason.as_ref().map(enum_str).transpose()?)
        .bind(&refund.failure_code)
        .bind(refund.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> ApiResult<Option<Refund>> {
        let row: Option<RefundRow> = sqlx::query_as(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(refund_from_row).transpose()
    }

    async fn list_refunds(
        &self,
        filter: &RefundFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Refund>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {REFUND_COLUMNS} FROM refunds WHERE {REFUND_FILTER_SQL} AND id = $7"
            );
            let anchor: Option<RefundRow> =
                bind_refund_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {REFUND_COLUMNS} FROM refunds
            WHERE {REFUND_FILTER_SQL}
              AND ($7::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM refunds WHERE id = $7))
            ORDER BY created_at DESC, id DESC
            LIMIT $8
            "#
        );
        let rows: Vec<RefundRow> = bind_refund_filter(sqlx::query_as(&page_sql), filter)
            .bind(query.after_id.clone())
            .bind(query.limit + 1)
            .fetch_all(&self.pool)
            .await?;

        let refunds = rows
            .into_iter()
            .map(refund_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(refunds, query.limit))
    }

    async fn insert_chargeback(&self, chargeback: &Chargeback) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chargebacks
                (id, payment_intent_id, amount, reason, status, evidence_url,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&chargeback.id)
        .bind(&chargeback.payment_intent_id)
        .bind(chargeback.amount)
        .bind(enum_str(&chargeback.reason)?)
        .bind(chargeback.status.as_str())
        .bind(&chargeback.evidence_url)
        .bind(chargeback.created_at)
        .bind(chargeback.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chargeback(&self, id: &str) -> ApiResult<Option<Chargeback>> {
        let row: Option<ChargebackRow> = sqlx::query_as(&format!(
            "SELECT {CHARGEBACK_COLUMNS} FROM chargebacks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(chargeback_from_row).transpose()
    }

    async fn update_chargeback(
        &self,
        chargeback: &Chargeback,
        expected_status: ChargebackStatus,
    ) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chargebacks
            SET status = $1, evidence_url = $2, updated_at = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(chargeback.status.as_str())
        .bind(&chargeback.evidence_url)
        .bind(chargeback.updated_at)
        .bind(&chargeback.id)
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM chargebacks WHERE id = $1")
                .bind(&chargeback.id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(ApiError::not_found("chargeback")),
        }
    }

    async fn list_chargebacks(
        &self,
        filter: &ChargebackFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<Chargeback>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {CHARGEBACK_COLUMNS} FROM chargebacks WHERE {CHARGEBACK_FILTER_SQL} AND id = $7"
            );
            let anchor: Option<ChargebackRow> =
                bind_chargeback_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {CHARGEBACK_COLUMNS} FROM chargebacks
            WHERE {CHARGEBACK_FILTER_SQL}
              AND ($7::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM chargebacks WHERE id = $7))
            ORDER BY created_at DESC, id DESC
            LIMIT $8
            "#
        );
        let rows: Vec<ChargebackRow> =
            bind_chargeback_filter(sqlx::query_as(&page_sql), filter)
                .bind(query.after_id.clone())
                .bind(query.limit + 1)
                .fetch_all(&self.pool)
                .await?;

        let chargebacks = rows
            .into_iter()
            .map(chargeback_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(chargebacks, query.limit))
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (id, payment_intent_id, refund_id, entry_type, direction, amount,
                 currency, provider, provider_reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.payment_intent_id)
        .bind(&entry.refund_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.direction.as_str())
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(&entry.provider)
        .bind(&entry.provider_reference)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        filter: &LedgerFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<LedgerEntry>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE {LEDGER_FILTER_SQL} AND id = $6"
            );
            let anchor: Option<LedgerRow> =
                bind_ledger_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM ledger_entries
            WHERE {LEDGER_FILTER_SQL}
              AND ($6::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM ledger_entries WHERE id = $6))
            ORDER BY created_at DESC, id DESC
            LIMIT $7
            "#
        );
        let rows: Vec<LedgerRow> = bind_ledger_filter(sqlx::query_as(&page_sql), filter)
            .bind(query.after_id.clone())
            .bind(query.limit + 1)
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .into_iter()
            .map(ledger_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(entries, query.limit))
    }
}

fn enum_str<T: serde::Serialize>(value: &T) -> ApiResult<String> {
    serde_json::to_value(value)?
        .as_str()
        .map(String::from)
        .ok_or_else(|| ApiError::internal("enum did not serialize to a string"))
}

type RefundRow = (
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

const REFUND_COLUMNS: &str =
    "id, payment_intent_id, amount, status, reason, failure_code, created_at";

const REFUND_FILTER_SQL: &str = r#"
      ($1::bigint IS NULL OR amount >= $1)
  AND ($2::bigint IS NULL OR amount <= $2)
  AND ($3::text IS NULL OR payment_intent_id = $3)
  AND ($4::text IS NULL OR status = $4)
  AND ($5::timestamptz IS NULL OR created_at >= $5)
  AND ($6::timestamptz IS NULL OR created_at <= $6)
"#;

fn bind_refund_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &RefundFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.amount_min)
        .bind(filter.amount_max)
        .bind(filter.payment_intent_id.clone())
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.created_from)
        .bind(filter.created_to)
}

fn refund_from_row(row: RefundRow) -> ApiResult<Refund> {
    let reason = row
        .4
        .map(|raw| {
            serde_json::from_value::<RefundReason>(JsonValue::String(raw.clone()))
                .map_err(|_| ApiError::internal(format!("stored refund reason '{raw}'")))
        })
        .transpose()?;
    Ok(Refund {
        id: row.0,
        payment_intent_id: row.1,
        amount: row.2,
        status: parse_enum(RefundStatus::parse(&row.3), "refund status", &row.3)?,
        reason,
        failure_code: row.5,
        created_at: row.6,
    })
}

type ChargebackRow = (
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const CHARGEBACK_COLUMNS: &str =
    "id, payment_intent_id, amount, reason, status, evidence_url, created_at, updated_at";

const CHARGEBACK_FILTER_SQL: &str = r#"
      ($1::bigint IS NULL OR amount >= $1)
  AND ($2::bigint IS NULL OR amount <= $2)
  AND ($3::text IS NULL OR payment_intent_id = $3)
  AND ($4::text IS NULL OR status = $4)
  AND ($5::timestamptz IS NULL OR created_at >= $5)
  AND ($6::timestamptz IS NULL OR created_at <= $6)
"#;

fn bind_chargeback_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &ChargebackFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.amount_min)
        .bind(filter.amount_max)
        .bind(filter.payment_intent_id.clone())
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.created_from)
        .bind(filter.created_to)
}

fn chargeback_from_row(row: ChargebackRow) -> ApiResult<Chargeback> {
    let reason =
        serde_json::from_value::<ChargebackReason>(JsonValue::String(row.3.clone()))
            .map_err(|_| ApiError::internal(format!("stored chargeback reason '{}'", row.3)))?;
    Ok(Chargeback {
        id: row.0,
        payment_intent_id: row.1,
        amount: row.2,
        reason,
        status: parse_enum(ChargebackStatus::parse(&row.4), "chargeback status", &row.4)?,
        evidence_url: row.5,
        created_at: row.6,
        updated_at: row.7,
    })
}

type LedgerRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

const LEDGER_COLUMNS: &str = "id, payment_intent_id, refund_id, entry_type, direction, \
     amount, currency, provider, provider_reference, created_at";

const LEDGER_FILTER_SQL: &str = r#"
      ($1::text IS NULL OR payment_intent_id = $1)
  AND ($2::text IS NULL OR entry_type = $2)
  AND ($3::text IS NULL OR currency = $3)
  AND ($4::timestamptz IS NULL OR created_at >= $4)
  AND ($5::timestamptz IS NULL OR created_at <= $5)
"#;

fn bind_ledger_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &LedgerFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.payment_intent_id.clone())
        .bind(filter.entry_type.map(|t| t.as_str().to_string()))
        .bind(filter.currency.clone())
        .bind(filter.created_from)
        .bind(filter.created_to)
}

fn ledger_from_row(row: LedgerRow) -> ApiResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.0,
        payment_intent_id: row.1,
        refund_id: row.2,
        entry_type: parse_enum(LedgerEntryType::parse(&row.3), "ledger entry type", &row.3)?,
        direction: parse_enum(LedgerDirection::parse(&row.4), "ledger direction", &row.4)?,
        amount: row.5,
        currency: row.6,
        provider: row.7,
        provider_reference: row.8,
        created_at: row.9,
    })
}

// ---------------------------------------------------------------------------
// Webhook repository
// ---------------------------------------------------------------------------

pub struct PgWebhookRepository {
    pool: PgPool,
}

impl PgWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type EndpointRow = (String, String, JsonValue, String, bool, DateTime<Utc>);

const ENDPOINT_COLUMNS: &str = "id, url, events, secret, enabled, created_at";

fn endpoint_from_row(row: EndpointRow) -> ApiResult<WebhookEndpoint> {
    let events: Vec<String> = serde_json::from_value(row.2)?;
    Ok(WebhookEndpoint {
        id: row.0,
        url: row.1,
        events,
        secret: row.3,
        enabled: row.4,
        created_at: row.5,
    })
}

type DeliveryRow = (
    String,
    String,
    String,
    String,
    i32,
    String,
    Option<i32>,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const DELIVERY_COLUMNS: &str = "id, endpoint_id, event_id, event_type, attempt, status, \
     response_status, error_code, created_at, delivered_at";

const DELIVERY_FILTER_SQL: &str = r#"
      ($1::text IS NULL OR endpoint_id = $1)
  AND ($2::text IS NULL OR event_id = $2)
  AND ($3::text IS NULL OR event_type = $3)
  AND ($4::text IS NULL OR status = $4)
"#;

fn bind_delivery_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &DeliveryFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.endpoint_id.clone())
        .bind(filter.event_id.clone())
        .bind(filter.event_type.clone())
        .bind(filter.status.map(|s| s.as_str().to_string()))
}

fn delivery_from_row(row: DeliveryRow) -> ApiResult<WebhookDelivery> {
    Ok(WebhookDelivery {
        id: row.0,
        endpoint_id: row.1,
        event_id: row.2,
        event_type: row.3,
        attempt: row.4,
        status: parse_enum(DeliveryStatus::parse(&row.5), "delivery status", &row.5)?,
        response_status: row.6.map(|s| s as u16),
        error_code: row.7,
        created_at: row.8,
        delivered_at: row.9,
    })
}

type DeadLetterRow = (
    String,
    String,
    String,
    String,
    String,
    i32,
    String,
    i32,
    String,
    Option<i32>,
    Option<String>,
    JsonValue,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const DEAD_LETTER_COLUMNS: &str = "id, endpoint_id, endpoint_url, event_id, event_type, \
     attempts, status, replay_count, failure_reason, response_status, error_code, \
     event_payload, failed_at, last_replayed_at";

const DEAD_LETTER_FILTER_SQL: &str = r#"
      ($1::text IS NULL OR status = $1)
  AND ($2::text IS NULL OR event_type = $2)
  AND ($3::text IS NULL OR endpoint_id = $3)
"#;

fn bind_dead_letter_filter<'q, O>(
    query: PgQueryAs<'q, O>,
    filter: &DeadLetterFilter,
) -> PgQueryAs<'q, O> {
    query
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.event_type.clone())
        .bind(filter.endpoint_id.clone())
}

fn dead_letter_from_row(row: DeadLetterRow) -> ApiResult<WebhookDeadLetter> {
    Ok(WebhookDeadLetter {
        id: row.0,
        endpoint_id: row.1,
        endpoint_url: row.2,
        event_id: row.3,
        event_type: row.4,
        attempts: row.5,
        status: parse_enum(DeadLetterStatus::parse(&row.6), "dead letter status", &row.6)?,
        replay_count: row.7,
        failure_reason: parse_enum(
            DeadLetterReason::parse(&row.8),
            "dead letter failure reason",
            &row.8,
        )?,
        response_status: row.9.map(|s| s as u16),
        error_code: row.10,
        event_payload: row.11,
        failed_at: row.12,
        last_replayed_at: row.13,
    })
}

#[async_trait]
impl WebhookRepository for PgWebhookRepository {
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (id, url, events, secret, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&endpoint.id)
        .bind(&endpoint.url)
        .bind(serde_json::to_value(&endpoint.events)?)
        .bind(&endpoint.secret)
        .bind(endpoint.enabled)
        .bind(endpoint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_endpoint(&self, id: &str) -> ApiResult<Option<WebhookEndpoint>> {
        let row: Option<EndpointRow> = sqlx::query_as(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(endpoint_from_row).transpose()
    }

    async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET url = $1, events = $2, secret = $3, enabled = $4
            WHERE id = $5
            "#,
        )
        .bind(&endpoint.url)
        .bind(serde_json::to_value(&endpoint.events)?)
        .bind(&endpoint.secret)
        .bind(endpoint.enabled)
        .bind(&endpoint.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_endpoints(&self, query: &ListQuery) -> ApiResult<Page<WebhookEndpoint>> {
        if let Some(after_id) = &query.after_id {
            let anchor: Option<(String,)> =
                sqlx::query_as("SELECT id FROM webhook_endpoints WHERE id = $1")
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let rows: Vec<EndpointRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
            WHERE ($1::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM webhook_endpoints WHERE id = $1))
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(query.after_id.clone())
        .bind(query.limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let endpoints = rows
            .into_iter()
            .map(endpoint_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(endpoints, query.limit))
    }

    async fn endpoints_for_event(&self, event_type: &str) -> ApiResult<Vec<WebhookEndpoint>> {
        let rows: Vec<EndpointRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints
            WHERE enabled
              AND (events = '[]'::jsonb OR events @> to_jsonb(ARRAY[$1::text]))
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(endpoint_from_row).collect()
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (id, endpoint_id, event_id, event_type, attempt, status,
                 response_status, error_code, created_at, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.endpoint_id)
        .bind(&delivery.event_id)
        .bind(&delivery.event_type)
        .bind(delivery.attempt)
        .bind(delivery.status.as_str())
        .bind(delivery.response_status.map(|s| s as i32))
        .bind(&delivery.error_code)
        .bind(delivery.created_at)
        .bind(delivery.delivered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDelivery>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE {DELIVERY_FILTER_SQL} AND id = $5"
            );
            let anchor: Option<DeliveryRow> =
                bind_delivery_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE {DELIVERY_FILTER_SQL}
              AND ($5::text IS NULL OR (created_at, id) <
                   (SELECT created_at, id FROM webhook_deliveries WHERE id = $5))
            ORDER BY created_at DESC, id DESC
            LIMIT $6
            "#
        );
        let rows: Vec<DeliveryRow> =
            bind_delivery_filter(sqlx::query_as(&page_sql), filter)
                .bind(query.after_id.clone())
                .bind(query.limit + 1)
                .fetch_all(&self.pool)
                .await?;

        let deliveries = rows
            .into_iter()
            .map(delivery_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(deliveries, query.limit))
    }

    async fn insert_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_dead_letters
                (id, endpoint_id, endpoint_url, event_id, event_type, attempts,
                 status, replay_count, failure_reason, response_status, error_code,
                 event_payload, failed_at, last_replayed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&dead_letter.id)
        .bind(&dead_letter.endpoint_id)
        .bind(&dead_letter.endpoint_url)
        .bind(&dead_letter.event_id)
        .bind(&dead_letter.event_type)
        .bind(dead_letter.attempts)
        .bind(dead_letter.status.as_str())
        .bind(dead_letter.replay_count)
        .bind(dead_letter.failure_reason.as_str())
        .bind(dead_letter.response_status.map(|s| s as i32))
        .bind(&dead_letter.error_code)
        .bind(&dead_letter.event_payload)
        .bind(dead_letter.failed_at)
        .bind(dead_letter.last_replayed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_dead_letter(&self, id: &str) -> ApiResult<Option<WebhookDeadLetter>> {
        let row: Option<DeadLetterRow> = sqlx::query_as(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM webhook_dead_letters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(dead_letter_from_row).transpose()
    }

    async fn update_dead_letter(&self, dead_letter: &WebhookDeadLetter) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_dead_letters
            SET attempts = $1, status = $2, replay_count = $3, failure_reason = $4,
                response_status = $5, error_code = $6, failed_at = $7,
                last_replayed_at = $8
            WHERE id = $9
            "#,
        )
        .bind(dead_letter.attempts)
        .bind(dead_letter.status.as_str())
        .bind(dead_letter.replay_count)
        .bind(dead_letter.failure_reason.as_str())
        .bind(dead_letter.response_status.map(|s| s as i32))
        .bind(&dead_letter.error_code)
        .bind(dead_letter.failed_at)
        .bind(dead_letter.last_replayed_at)
        .bind(&dead_letter.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_dead_letters(
        &self,
        filter: &DeadLetterFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<WebhookDeadLetter>> {
        if let Some(after_id) = &query.after_id {
            let anchor_sql = format!(
                "SELECT {DEAD_LETTER_COLUMNS} FROM webhook_dead_letters WHERE {DEAD_LETTER_FILTER_SQL} AND id = $4"
            );
            let anchor: Option<DeadLetterRow> =
                bind_dead_letter_filter(sqlx::query_as(&anchor_sql), filter)
                    .bind(after_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if anchor.is_none() {
                return Err(ApiError::invalid_cursor());
            }
        }

        let page_sql = format!(
            r#"
            SELECT {DEAD_LETTER_COLUMNS} FROM webhook_dead_letters
            WHERE {DEAD_LETTER_FILTER_SQL}
              AND ($4::text IS NULL OR (failed_at, id) <
                   (SELECT failed_at, id FROM webhook_dead_letters WHERE id = $4))
            ORDER BY failed_at DESC, id DESC
            LIMIT $5
            "#
        );
        let rows: Vec<DeadLetterRow> =
            bind_dead_letter_filter(sqlx::query_as(&page_sql), filter)
                .bind(query.after_id.clone())
                .bind(query.limit + 1)
                .fetch_all(&self.pool)
                .await?;

        let dead_letters = rows
            .into_iter()
            .map(dead_letter_from_row)
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(page_window(dead_letters, query.limit))
    }
}
