use event_bus::{EventStream, InMemoryStream, JetStreamEventStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use payments_rs::clock::{Clock, SystemClock};
use payments_rs::config::Config;
use payments_rs::cursor::CursorSigner;
use payments_rs::events::{
    DurableEventPipeline, EventPipeline, EventStore, InMemoryEventPipeline, InMemoryEventStore,
    PgEventStore,
};
use payments_rs::idempotency::{IdempotencyStore, InMemoryIdempotencyStore, PgIdempotencyStore};
use payments_rs::providers::{
    CircuitBreaker, HttpProviderGateway, ProviderGateway, ProviderRouter,
};
use payments_rs::rate_limit::{PgRateLimiter, RateLimiter, TokenBucketLimiter};
use payments_rs::repos::{
    InMemoryPaymentRepository, InMemoryWebhookRepository, PaymentRepository,
    PgPaymentRepository, PgWebhookRepository, WebhookRepository,
};
use payments_rs::risk::RiskEngine;
use payments_rs::services::{PaymentOrchestrator, WebhookService};
use payments_rs::state::AppState;
use payments_rs::webhooks::{HttpWebhookSender, WebhookDispatcher};
use payments_rs::{build_router, db};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting payments service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");
    tracing::info!(
        host = %config.host,
        port = config.port,
        store_type = %config.store_type,
        bus_type = %config.bus_type,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Durable backends
    let (pool, repo, webhook_repo, idempotency, event_store): (
        Option<sqlx::PgPool>,
        Arc<dyn PaymentRepository>,
        Arc<dyn WebhookRepository>,
        Arc<dyn IdempotencyStore>,
        Arc<dyn EventStore>,
    ) = match config.store_type.as_str() {
        "postgres" => {
            let url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is validated at config load");
            tracing::info!("Connecting to database...");
            let pool = db::connect(url).await.expect("Failed to connect to database");

            tracing::info!("Running migrations...");
            sqlx::migrate!("./db/migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            (
                Some(pool.clone()),
                Arc::new(PgPaymentRepository::new(pool.clone())),
                Arc::new(PgWebhookRepository::new(pool.clone())),
                Arc::new(PgIdempotencyStore::new(
                    pool.clone(),
                    config.idempotency_ttl_seconds,
                    clock.clone(),
                )),
                Arc::new(PgEventStore::new(pool)),
            )
        }
        _ => {
            tracing::info!("Using in-memory stores");
            (
                None,
                Arc::new(InMemoryPaymentRepository::new()),
                Arc::new(InMemoryWebhookRepository::new()),
                Arc::new(InMemoryIdempotencyStore::new(
                    config.idempotency_ttl_seconds,
                    clock.clone(),
                )),
                Arc::new(InMemoryEventStore::new()),
            )
        }
    };

    // Rate limiter: process-local buckets, or shared buckets in Postgres
    let (rate_limiter, local_limiter): (
        Arc<dyn RateLimiter>,
        Option<Arc<TokenBucketLimiter>>,
    ) = match &pool {
        Some(pool) => (
            Arc::new(PgRateLimiter::new(
                pool.clone(),
                config.rate_limit_window_seconds,
                config.rate_limit_max_requests,
                clock.clone(),
            )),
            None,
        ),
        None => {
            let limiter = Arc::new(TokenBucketLimiter::new(
                config.rate_limit_window_seconds,
                config.rate_limit_max_requests,
                clock.clone(),
            ));
            (limiter.clone(), Some(limiter))
        }
    };

    // Event pipeline: synchronous in-memory bus, or outbox + stream + inbox
    let (pipeline, durable): (
        Arc<dyn EventPipeline>,
        Option<Arc<DurableEventPipeline>>,
    ) = match config.bus_type.as_str() {
        "nats" => {
            tracing::info!(url = %config.nats_url, "Connecting to NATS...");
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            let stream: Arc<dyn EventStream> = Arc::new(
                JetStreamEventStream::new(client, &config.nats_stream, &config.nats_subject)
                    .await
                    .expect("Failed to set up JetStream stream"),
            );
            let durable = Arc::new(DurableEventPipeline::new(
                event_store,
                stream,
                clock.clone(),
                config.consumer_group.clone(),
                config.event_batch_size,
                config.event_block_ms,
                config.consumer_max_attempts,
            ));
            (durable.clone() as Arc<dyn EventPipeline>, Some(durable))
        }
        _ if config.store_type == "postgres" => {
            // Durable store with a local stream: keeps the outbox/inbox
            // semantics without a broker
            let stream: Arc<dyn EventStream> = Arc::new(InMemoryStream::new());
            let durable = Arc::new(DurableEventPipeline::new(
                event_store,
                stream,
                clock.clone(),
                config.consumer_group.clone(),
                config.event_batch_size,
                config.event_block_ms,
                config.consumer_max_attempts,
            ));
            (durable.clone() as Arc<dyn EventPipeline>, Some(durable))
        }
        _ => {
            tracing::info!("Using in-memory event pipeline");
            (Arc::new(InMemoryEventPipeline::new()), None)
        }
    };

    // Provider gateways behind the router + breaker
    let gateways: Vec<Arc<dyn ProviderGateway>> = config
        .provider_endpoints
        .iter()
        .map(|(name, base_url)| {
            Arc::new(HttpProviderGateway::new(
                name.clone(),
                base_url.clone(),
                Vec::new(),
                config.provider_timeout_ms,
            )) as Arc<dyn ProviderGateway>
        })
        .collect();
    let router = Arc::new(ProviderRouter::new(
        gateways,
        config.provider_priorities.clone(),
        config.default_provider.clone(),
        CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown_seconds,
            config.breaker_transient_only,
            clock.clone(),
        ),
    ));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        repo.clone(),
        idempotency,
        pipeline.clone(),
        router,
        RiskEngine::new(config.risk_review_amount_threshold),
        clock.clone(),
    ));

    let dispatcher = Arc::new(WebhookDispatcher::new(
        webhook_repo.clone(),
        Arc::new(HttpWebhookSender::new(config.webhook_timeout_ms)),
        clock.clone(),
        config.webhook_max_attempts,
    ));
    pipeline.subscribe(dispatcher.clone());

    let webhook_service = Arc::new(WebhookService::new(
        webhook_repo.clone(),
        dispatcher,
        clock.clone(),
    ));

    if let Some(durable) = &durable {
        let recovered = durable
            .recover()
            .await
            .expect("Outbox recovery pass failed");
        if recovered > 0 {
            tracing::info!(recovered, "republished outbox events");
        }
        durable.clone().start();
    }

    if let Some(limiter) = local_limiter {
        let sweep_every = Duration::from_secs(config.rate_limit_window_seconds.max(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                ticker.tick().await;
                limiter.evict_idle();
            }
        });
    }

    let state = Arc::new(AppState {
        cursor: Arc::new(CursorSigner::new(&config.cursor_secrets)),
        clock,
        repo,
        webhook_repo,
        pipeline,
        orchestrator,
        webhook_service,
        rate_limiter,
        pool: pool.clone(),
        config,
    });

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    tracing::info!("Payments service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    // Drain order: consumer loop first, connections last
    if let Some(durable) = &durable {
        durable.stop();
    }
    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("Payments service stopped");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
}
