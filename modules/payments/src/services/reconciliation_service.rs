//! Reconciliation totals derived from the ledger
//!
//! Walks the full filtered ledger page by page. Credits and debits offset
//! each other per entry type, so replays and reversals net out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::models::{LedgerDirection, LedgerEntryType};
use crate::repos::{LedgerFilter, ListQuery, PaymentRepository};

const SCAN_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub currency: Option<String>,
    pub captured_total: i64,
    pub refunded_total: i64,
    pub chargeback_total: i64,
    pub net_settled_total: i64,
}

pub async fn summarize(
    repo: &Arc<dyn PaymentRepository>,
    currency: Option<String>,
    created_from: Option<DateTime<Utc>>,
    created_to: Option<DateTime<Utc>>,
) -> ApiResult<ReconciliationSummary> {
    let filter = LedgerFilter {
        currency: currency.clone(),
        created_from,
        created_to,
        ..Default::default()
    };

    let mut captured_total = 0;
    let mut refunded_total = 0;
    let mut chargeback_total = 0;

    let mut query = ListQuery::first(SCAN_PAGE_SIZE);
    loop {
        let page = repo.list_ledger_entries(&filter, &query).await?;
        for entry in &page.items {
            let signed = match entry.direction {
                LedgerDirection::Credit => entry.amount,
                LedgerDirection::Debit => -entry.amount,
            };
            match entry.entry_type {
                LedgerEntryType::Capture => captured_total += signed,
                // Refunds and chargebacks move money out, so debits add
                LedgerEntryType::Refund => refunded_total -= signed,
                LedgerEntryType::Chargeback => chargeback_total -= signed,
                LedgerEntryType::Authorization => {}
            }
        }
        match (page.has_more, page.items.last()) {
            (true, Some(last)) => query = ListQuery::after(SCAN_PAGE_SIZE, last.id.clone()),
            _ => break,
        }
    }

    Ok(ReconciliationSummary {
        currency,
        captured_total,
        refunded_total,
        chargeback_total,
        net_settled_total: captured_total - refunded_total - chargeback_total,
    })
}
