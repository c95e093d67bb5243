//! Shared application state wired once at startup

use sqlx::PgPool;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::cursor::CursorSigner;
use crate::events::EventPipeline;
use crate::rate_limit::RateLimiter;
use crate::repos::{PaymentRepository, WebhookRepository};
use crate::services::{PaymentOrchestrator, WebhookService};

pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub repo: Arc<dyn PaymentRepository>,
    pub webhook_repo: Arc<dyn WebhookRepository>,
    pub pipeline: Arc<dyn EventPipeline>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhook_service: Arc<WebhookService>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub cursor: Arc<CursorSigner>,
    /// Present only with the Postgres backends; used by readiness checks
    pub pool: Option<PgPool>,
}
