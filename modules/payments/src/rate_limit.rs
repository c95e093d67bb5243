//! Token-bucket rate limiting per API-key identity
//!
//! The bucket holds up to `max_requests` tokens and refills continuously at
//! `max_requests / window_seconds` per second. The local variant keeps
//! buckets in a concurrent map; the Postgres variant runs the same
//! arithmetic atomically server-side so multiple workers observe identical
//! semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ApiResult;

/// Identity under which a request is throttled: hash of the presented key,
/// so raw API keys never sit in bucket maps or tables
pub fn api_key_identity(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the bucket is full again
    pub reset_seconds: u64,
    /// Seconds until the next token when denied; 0 when allowed
    pub retry_after_seconds: u64,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, identity: &str) -> ApiResult<RateLimitDecision>;
}

struct Bucket {
    tokens: f64,
    updated_at: DateTime<Utc>,
}

/// In-process token buckets keyed by identity
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Bucket>,
    window_seconds: u64,
    max_requests: u32,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(window_seconds: u64, max_requests: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            window_seconds,
            max_requests,
            clock,
        }
    }

    fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.window_seconds as f64
    }

    fn decide(&self, tokens_after: f64, allowed: bool) -> RateLimitDecision {
        let rate = self.refill_rate();
        let max = self.max_requests as f64;
        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining: tokens_after.floor() as u32,
            reset_seconds: ((max - tokens_after) / rate).ceil() as u64,
            retry_after_seconds: if allowed {
                0
            } else {
                ((1.0 - tokens_after) / rate).ceil() as u64
            },
        }
    }

    /// Drop buckets idle for at least three windows
    pub fn evict_idle(&self) {
        let now = self.clock.now();
        let idle_cutoff = (self.window_seconds * 3) as i64;
        self.buckets.retain(|_, bucket| {
            (now - bucket.updated_at).num_seconds() < idle_cutoff
        });
    }

    /// Number of live buckets (test helper)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn check(&self, identity: &str) -> ApiResult<RateLimitDecision> {
        let now = self.clock.now();
        let max = self.max_requests as f64;

        let mut entry = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| Bucket {
                tokens: max,
                updated_at: now,
            });

        let elapsed =
            (now - entry.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        let mut tokens = (entry.tokens + elapsed * self.refill_rate()).min(max);

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }
        entry.tokens = tokens;
        entry.updated_at = now;
        drop(entry);

        Ok(self.decide(tokens, allowed))
    }
}

/// Server-side token buckets shared by all worker processes
///
/// The refill-and-consume arithmetic runs inside a single statement so
/// concurrent workers serialize on the bucket row.
pub struct PgRateLimiter {
    pool: PgPool,
    window_seconds: u64,
    max_requests: u32,
    clock: Arc<dyn Clock>,
}

impl PgRateLimiter {
    pub fn new(
        pool: PgPool,
        window_seconds: u64,
        max_requests: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            window_seconds,
            max_requests,
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check(&self, identity: &str) -> ApiResult<RateLimitDecision> {
        let now = self.clock.now();
        let max = self.max_requests as f64;
        let rate = max / self.window_seconds as f64;

        let (allowed, tokens): (bool, f64) = sqlx::query_as(
            r#"
            WITH refill AS (
                INSERT INTO payment_rate_limit_buckets AS b (identity, tokens, updated_at)
                VALUES ($1, $2::double precision, $3)
                ON CONFLICT (identity) DO UPDATE
                SET tokens = LEAST(
                        $2::double precision,
                        b.tokens + EXTRACT(EPOCH FROM ($3 - b.updated_at)) * $4
                    ),
                    updated_at = $3
                RETURNING identity, tokens
            )
            UPDATE payment_rate_limit_buckets b
            SET tokens = CASE
                    WHEN refill.tokens >= 1 THEN refill.tokens - 1
                    ELSE refill.tokens
                END
            FROM refill
            WHERE b.identity = refill.identity
            RETURNING refill.tokens >= 1 AS allowed, b.tokens AS tokens
            "#,
        )
        .bind(identity)
        .bind(max)
        .bind(now)
        .bind(rate)
        .fetch_one(&self.pool)
        .await?;

        Ok(RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining: tokens.floor() as u32,
            reset_seconds: ((max - tokens) / rate).ceil() as u64,
            retry_after_seconds: if allowed {
                0
            } else {
                ((1.0 - tokens) / rate).ceil() as u64
            },
        })
    }
}
