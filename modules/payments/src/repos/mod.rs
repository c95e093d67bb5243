//! Persistence ports
//!
//! Every durable dependency is a trait with two backends: an in-memory store
//! for dev/test and a Postgres store for production, selected by
//! `STORE_TYPE`. Listings share the same ordering contract: `created_at`
//! descending, then `id` descending, with an id-anchored cursor meaning
//! "first item strictly after this id in the sorted sequence".

pub mod memory;
pub mod payment_repo;
pub mod pg;
pub mod webhook_repo;

pub use memory::{InMemoryPaymentRepository, InMemoryWebhookRepository};
pub use payment_repo::{
    ChargebackFilter, IntentFilter, LedgerFilter, PaymentRepository, RefundFilter,
};
pub use pg::{PgPaymentRepository, PgWebhookRepository};
pub use webhook_repo::{DeadLetterFilter, DeliveryFilter, WebhookRepository};

use chrono::{DateTime, Utc};

use crate::error::{ApiError, ApiResult};

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            has_more: self.has_more,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Decoded listing parameters (the route layer owns cursor signing)
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: i64,
    /// Internal cursor: id of the last item of the previous page
    pub after_id: Option<String>,
}

impl ListQuery {
    pub fn first(limit: i64) -> Self {
        Self {
            limit,
            after_id: None,
        }
    }

    pub fn after(limit: i64, id: impl Into<String>) -> Self {
        Self {
            limit,
            after_id: Some(id.into()),
        }
    }
}

/// Sort key shared by all listings
pub(crate) fn sort_desc<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, String)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

/// Paginate an already-filtered, already-sorted slice in memory
///
/// Fails with `invalid_cursor` when the anchor id is not present in the
/// current filtered window.
pub(crate) fn paginate_sorted<T: Clone>(
    items: &[T],
    query: &ListQuery,
    id_of: impl Fn(&T) -> &str,
) -> ApiResult<Page<T>> {
    let start = match &query.after_id {
        None => 0,
        Some(after) => {
            let position = items
                .iter()
                .position(|item| id_of(item) == after)
                .ok_or_else(ApiError::invalid_cursor)?;
            position + 1
        }
    };

    let limit = query.limit.max(0) as usize;
    let window = &items[start.min(items.len())..];
    let has_more = window.len() > limit;
    Ok(Page {
        items: window.iter().take(limit).cloned().collect(),
        has_more,
    })
}
