//! Webhook endpoint management and dead-letter replay
//!
//! Endpoint reads and conditional writes use a content-digest ETag: the
//! first 24 hex chars of SHA-256 over the canonical JSON of the stable
//! fields (secret excluded). Replay sends one attempt against the
//! endpoint's current url; the dead letter keeps its payload snapshot.

use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::canonical::canonical_json;
use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    new_id, DeadLetterReason, DeadLetterStatus, WebhookDeadLetter, WebhookEndpoint,
};
use crate::repos::{DeadLetterFilter, ListQuery, WebhookRepository};
use crate::validation::validate_webhook_url;
use crate::webhooks::dispatcher::{is_permanent_status, WebhookDispatcher};

/// Parsed `If-Match` precondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfMatch {
    Any,
    Tag(String),
}

impl IfMatch {
    /// `*` or a quoted entity tag; anything else is `invalid_if_match`
    pub fn parse(raw: &str) -> ApiResult<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Any);
        }
        let tag = raw
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .ok_or_else(ApiError::invalid_if_match)?;
        if tag.is_empty() || tag.contains('"') {
            return Err(ApiError::invalid_if_match());
        }
        Ok(Self::Tag(tag.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEndpointRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayBatchRequest {
    pub limit: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
}

/// Digest of the endpoint's stable fields, used as the ETag value
pub fn endpoint_etag(endpoint: &WebhookEndpoint) -> String {
    let stable = json!({
        "id": endpoint.id,
        "url": endpoint.url,
        "events": endpoint.events,
        "enabled": endpoint.enabled,
    });
    let digest = hex::encode(Sha256::digest(canonical_json(&stable).as_bytes()));
    digest[..24].to_string()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

pub struct WebhookService {
    repo: Arc<dyn WebhookRepository>,
    dispatcher: Arc<WebhookDispatcher>,
    clock: Arc<dyn Clock>,
}

impl WebhookService {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        dispatcher: Arc<WebhookDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            clock,
        }
    }

    pub async fn create_endpoint(
        &self,
        request: CreateEndpointRequest,
    ) -> ApiResult<WebhookEndpoint> {
        validate_webhook_url(&request.url)?;
        let endpoint = WebhookEndpoint {
            id: new_id("whe"),
            url: request.url,
            events: request.events,
            secret: generate_secret(),
            enabled: request.enabled,
            created_at: self.clock.now(),
        };
        self.repo.insert_endpoint(&endpoint).await?;
        tracing::info!(endpoint_id = %endpoint.id, url = %endpoint.url, "webhook endpoint created");
        Ok(endpoint)
    }

    pub async fn get_endpoint(&self, id: &str) -> ApiResult<WebhookEndpoint> {
        self.repo
            .get_endpoint(id)
            .await?
            .ok_or_else(|| ApiError::not_found("webhook endpoint"))
    }

    fn check_precondition(
        endpoint: &WebhookEndpoint,
        if_match: Option<&IfMatch>,
    ) -> ApiResult<()> {
        match if_match {
            None | Some(IfMatch::Any) => Ok(()),
            Some(IfMatch::Tag(tag)) if *tag == endpoint_etag(endpoint) => Ok(()),
            Some(IfMatch::Tag(_)) => Err(ApiError::precondition_failed()),
        }
    }

    pub async fn update_endpoint(
        &self,
        id: &str,
        request: UpdateEndpointRequest,
        if_match: Option<IfMatch>,
    ) -> ApiResult<WebhookEndpoint> {
        let mut endpoint = self.get_endpoint(id).await?;
        Self::check_precondition(&endpoint, if_match.as_ref())?;

        if let Some(url) = request.url {
            validate_webhook_url(&url)?;
            endpoint.url = url;
        }
        if let Some(events) = request.events {
            endpoint.events = events;
        }
        if let Some(enabled) = request.enabled {
            endpoint.enabled = enabled;
        }
        if !self.repo.update_endpoint(&endpoint).await? {
            return Err(ApiError::not_found("webhook endpoint"));
        }
        Ok(endpoint)
    }

    pub async fn rotate_secret(
        &self,
        id: &str,
        if_match: Option<IfMatch>,
    ) -> ApiResult<WebhookEndpoint> {
        let mut endpoint = self.get_endpoint(id).await?;
        Self::check_precondition(&endpoint, if_match.as_ref())?;

        endpoint.secret = generate_secret();
        if !self.repo.update_endpoint(&endpoint).await? {
            return Err(ApiError::not_found("webhook endpoint"));
        }
        tracing::info!(endpoint_id = %endpoint.id, "webhook endpoint secret rotated");
        Ok(endpoint)
    }

    /// One replay attempt for a dead letter
    pub async fn replay(&self, dead_letter_id: &str) -> ApiResult<WebhookDeadLetter> {
        let mut dead_letter = self
            .repo
            .get_dead_letter(dead_letter_id)
            .await?
            .ok_or_else(|| ApiError::not_found("webhook dead letter"))?;

        if dead_letter.status == DeadLetterStatus::Replayed {
            return Err(ApiError::dead_letter_already_replayed());
        }

        let endpoint = self
            .repo
            .get_endpoint(&dead_letter.endpoint_id)
            .await?
            .ok_or_else(|| ApiError::not_found("webhook endpoint"))?;
        if !endpoint.enabled {
            return Err(ApiError::webhook_endpoint_disabled());
        }

        let attempt_no = dead_letter.attempts + 1;
        let outcome = self
            .dispatcher
            .attempt(
                &endpoint.id,
                &endpoint.url,
                &endpoint.secret,
                &dead_letter.event_id,
                &dead_letter.event_type,
                &dead_letter.event_payload,
                attempt_no,
            )
            .await?;

        dead_letter.replay_count += 1;
        dead_letter.attempts = attempt_no;
        if outcome.ok {
            dead_letter.status = DeadLetterStatus::Replayed;
            dead_letter.last_replayed_at = Some(self.clock.now());
            tracing::info!(dead_letter_id = %dead_letter.id, "dead letter replayed");
        } else {
            dead_letter.failure_reason = if outcome
                .response_status
                .is_some_and(is_permanent_status)
            {
                DeadLetterReason::PermanentFailure
            } else {
                DeadLetterReason::MaxAttemptsExhausted
            };
            dead_letter.response_status = outcome.response_status;
            dead_letter.error_code = outcome.error_code;
            dead_letter.failed_at = self.clock.now();
            tracing::warn!(dead_letter_id = %dead_letter.id, "dead letter replay failed");
        }
        self.repo.update_dead_letter(&dead_letter).await?;
        Ok(dead_letter)
    }

    /// Replay the first page of matching dead letters, one attempt each
    pub async fn replay_batch(
        &self,
        request: ReplayBatchRequest,
    ) -> ApiResult<serde_json::Value> {
        if !(1..=5000).contains(&request.limit) {
            return Err(ApiError::new(
                axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_replay_batch",
                "limit must be between 1 and 5000",
            ));
        }
        let status = match request.status.as_deref() {
            None => Some(DeadLetterStatus::Pending),
            Some(raw) => Some(DeadLetterStatus::parse(raw).ok_or_else(|| {
                ApiError::new(
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid_replay_batch",
                    format!("unknown status filter '{raw}'"),
                )
            })?),
        };

        let filter = DeadLetterFilter {
            status,
            event_type: request.event_type,
            endpoint_id: request.endpoint_id,
        };
        let page = self
            .repo
            .list_dead_letters(&filter, &ListQuery::first(request.limit))
            .await?;
        let has_more = page.has_more;

        let mut results = Vec::with_capacity(page.items.len());
        let mut replayed = 0u64;
        let mut failed = 0u64;
        for dead_letter in &page.items {
            match self.replay(&dead_letter.id).await {
                Ok(updated) if updated.status == DeadLetterStatus::Replayed => {
                    replayed += 1;
                    results.push(json!({
                        "dead_letter_id": updated.id,
                        "status": updated.status,
                        "replay_count": updated.replay_count,
                        "outcome": "replayed",
                    }));
                }
                Ok(updated) => {
                    failed += 1;
                    results.push(json!({
                        "dead_letter_id": updated.id,
                        "status": updated.status,
                        "replay_count": updated.replay_count,
                        "outcome": "failed",
                        "error_code": updated.error_code,
                    }));
                }
                Err(e) => {
                    failed += 1;
                    results.push(json!({
                        "dead_letter_id": dead_letter.id,
                        "status": dead_letter.status,
                        "replay_count": dead_letter.replay_count,
                        "outcome": "failed",
                        "error_code": e.code,
                    }));
                }
            }
        }

        Ok(json!({
            "results": results,
            "summary": {
                "processed": results.len(),
                "replayed": replayed,
                "failed": failed,
                "has_more": has_more,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn if_match_accepts_star_and_quoted_tags() {
        assert_eq!(IfMatch::parse("*").unwrap(), IfMatch::Any);
        assert_eq!(
            IfMatch::parse("\"abc123\"").unwrap(),
            IfMatch::Tag("abc123".into())
        );
        assert!(IfMatch::parse("abc123").is_err());
        assert!(IfMatch::parse("\"\"").is_err());
    }

    #[test]
    fn etag_tracks_stable_fields_only() {
        let mut endpoint = WebhookEndpoint {
            id: "whe_1".into(),
            url: "https://example.com/hook".into(),
            events: vec!["refund.succeeded".into()],
            secret: "whsec_a".into(),
            enabled: true,
            created_at: Utc::now(),
        };
        let original = endpoint_etag(&endpoint);
        assert_eq!(original.len(), 24);

        // Rotating the secret must not invalidate caches
        endpoint.secret = "whsec_b".into();
        assert_eq!(endpoint_etag(&endpoint), original);

        endpoint.url = "https://example.com/hook2".into();
        assert_ne!(endpoint_etag(&endpoint), original);
    }

    #[test]
    fn generated_secrets_are_prefixed_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert!(a.starts_with("whsec_"));
        assert_eq!(a.len(), 6 + 32);
        assert_ne!(a, b);
    }
}
