//! Idempotency records and per-key single-flight locks
//!
//! Records are keyed by (scope, key) and expire after a configured TTL.
//! `lock` serializes every writer with the same (scope, key): in-process via
//! a named-lock map, across processes via a Postgres advisory lock keyed by
//! a hash of `scope\nkey`. The lock is held for the entire execute+store
//! sequence so a concurrent duplicate observes either nothing or the stored
//! result, never partial side effects.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::ApiResult;

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub fingerprint: String,
    pub status_code: u16,
    pub response_body: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Held for the duration of an idempotent write; releasing unblocks the next
/// writer with the same (scope, key)
#[async_trait]
pub trait KeyLockGuard: Send {
    async fn release(self: Box<Self>);
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Serialize all callers with the same (scope, key)
    async fn lock(&self, scope: &str, key: &str) -> ApiResult<Box<dyn KeyLockGuard>>;

    /// Fetch a live record; expired records are treated as absent
    async fn get(&self, scope: &str, key: &str) -> ApiResult<Option<IdempotencyRecord>>;

    /// First-writer-wins: a second put for the same (scope, key) is a no-op
    async fn put(&self, scope: &str, key: &str, record: IdempotencyRecord) -> ApiResult<()>;
}

fn composite_key(scope: &str, key: &str) -> String {
    // '\n' cannot appear in either part, so the composite is unambiguous
    format!("{scope}\n{key}")
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

pub struct InMemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            locks: DashMap::new(),
            ttl: Duration::seconds(ttl_seconds),
            clock,
        }
    }
}

struct InMemoryGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl KeyLockGuard for InMemoryGuard {
    async fn release(self: Box<Self>) {}
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lock(&self, scope: &str, key: &str) -> ApiResult<Box<dyn KeyLockGuard>> {
        let mutex = self
            .locks
            .entry(composite_key(scope, key))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        Ok(Box::new(InMemoryGuard { _guard: guard }))
    }

    async fn get(&self, scope: &str, key: &str) -> ApiResult<Option<IdempotencyRecord>> {
        let composite = composite_key(scope, key);
        let now = self.clock.now();
        if let Some(record) = self.records.get(&composite) {
            if record.created_at + self.ttl > now {
                return Ok(Some(record.clone()));
            }
        } else {
            return Ok(None);
        }
        // Expired: evict so the key becomes reusable
        self.records.remove(&composite);
        Ok(None)
    }

    async fn put(&self, scope: &str, key: &str, record: IdempotencyRecord) -> ApiResult<()> {
        self.records
            .entry(composite_key(scope, key))
            .or_insert(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

pub struct PgIdempotencyStore {
    pool: PgPool,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool, ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            ttl: Duration::seconds(ttl_seconds),
            clock,
        }
    }

    /// Advisory lock key: first 8 bytes of SHA-256 over `scope\nkey`
    fn advisory_key(scope: &str, key: &str) -> i64 {
        let digest = Sha256::digest(composite_key(scope, key).as_bytes());
        i64::from_be_bytes(digest[..8].try_into().expect("digest has 32 bytes"))
    }
}

struct PgGuard {
    conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>>,
    lock_key: i64,
}

#[async_trait]
impl KeyLockGuard for PgGuard {
    async fn release(mut self: Box<Self>) {
        if let Some(mut conn) = self.conn.take() {
            let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_key)
                .execute(&mut *conn)
                .await;
            if let Err(e) = unlock {
                tracing::error!(error = %e, "failed to release advisory lock; closing connection");
                // Closing the session releases every advisory lock it holds
                drop(conn.detach());
            }
        }
    }
}

impl Drop for PgGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Released without calling release(): do not return the
            // connection to the pool still holding the session lock
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lock(&self, scope: &str, key: &str) -> ApiResult<Box<dyn KeyLockGuard>> {
        let lock_key = Self::advisory_key(scope, key);
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(lock_key)
            .execute(&mut *conn)
            .await?;
        Ok(Box::new(PgGuard {
            conn: Some(conn),
            lock_key,
        }))
    }

    async fn get(&self, scope: &str, key: &str) -> ApiResult<Option<IdempotencyRecord>> {
        let row: Option<(String, i32, JsonValue, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT payload_fingerprint, status_code, response_body, created_at
            FROM payment_idempotency_keys
            WHERE scope = $1 AND idempotency_key = $2 AND expires_at > $3
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(fingerprint, status_code, response_body, created_at)| {
            IdempotencyRecord {
                fingerprint,
                status_code: status_code as u16,
                response_body,
                created_at,
            }
        }))
    }

    async fn put(&self, scope: &str, key: &str, record: IdempotencyRecord) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_idempotency_keys
                (scope, idempotency_key, payload_fingerprint, status_code,
                 response_body, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (scope, idempotency_key) DO NOTHING
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(&record.fingerprint)
        .bind(record.status_code as i32)
        .bind(&record.response_body)
        .bind(record.created_at)
        .bind(record.created_at + self.ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store() -> (InMemoryIdempotencyStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (InMemoryIdempotencyStore::new(3600, clock.clone()), clock)
    }

    fn record(clock: &ManualClock) -> IdempotencyRecord {
        IdempotencyRecord {
            fingerprint: "fp1".into(),
            status_code: 201,
            response_body: json!({"id": "pi_1"}),
            created_at: clock.now(),
        }
    }

    #[tokio::test]
    async fn records_expire_after_ttl() {
        let (store, clock) = store();
        store.put("create", "k1", record(&clock)).await.unwrap();
        assert!(store.get("create", "k1").await.unwrap().is_some());

        clock.advance(Duration::seconds(3601));
        assert!(store.get("create", "k1").await.unwrap().is_none());
        // Key is reusable after expiry
        store.put("create", "k1", record(&clock)).await.unwrap();
        assert!(store.get("create", "k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_is_first_writer_wins() {
        let (store, clock) = store();
        store.put("create", "k1", record(&clock)).await.unwrap();

        let mut second = record(&clock);
        second.fingerprint = "fp2".into();
        store.put("create", "k1", second).await.unwrap();

        let stored = store.get("create", "k1").await.unwrap().unwrap();
        assert_eq!(stored.fingerprint, "fp1");
    }

    #[tokio::test]
    async fn scopes_do_not_collide() {
        let (store, clock) = store();
        store.put("confirm:pi_1", "k", record(&clock)).await.unwrap();
        assert!(store.get("capture:pi_1", "k").await.unwrap().is_none());
        // The composite key separator keeps scope/key boundaries distinct
        assert!(store.get("confirm", ":pi_1\nk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_serializes_same_key() {
        let (store, _clock) = store();
        let store = Arc::new(store);
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let guard = store.lock("scope", "key").await.unwrap();
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                guard.release().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "critical section must be exclusive");
    }
}
