//! Durable event pipeline: outbox, stream append, consumer-group inbox
//!
//! Publish is a two-step visible sequence: outbox row first (conflict-free on
//! event id), stream append second, then the row is stamped with the stream
//! position. A crash between the steps leaves a row without `published_at`;
//! the recovery pass republishes those on startup.
//!
//! The consumer loop reads batches through a named consumer group. Each
//! message is claimed in the inbox before subscribers run; a duplicate claim
//! means another delivery already processed it and the message is just
//! acknowledged. Within one delivery the subscriber chain is retried from
//! the first subscriber that has not yet succeeded, up to
//! `consumer_max_attempts` passes with a quadratic backoff between them.
//! If the chain still has not completed, the claim is released and the
//! message is left unacked for redelivery.

use async_trait::async_trait;
use event_bus::EventStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::ApiResult;
use crate::events::envelope::{EventFilter, PaymentEvent};
use crate::events::store::EventStore;
use crate::events::{EventPipeline, EventSubscriber};
use crate::metrics;
use crate::repos::{ListQuery, Page};

/// Pause before retrying the subscriber chain: 250ms, 1s, 2.25s, ...
/// growing with the square of the attempt number, capped at 10s
const RETRY_PAUSE_BASE: Duration = Duration::from_millis(250);
const RETRY_PAUSE_CAP: Duration = Duration::from_secs(10);

fn retry_pause(attempt: u32) -> Duration {
    RETRY_PAUSE_BASE
        .saturating_mul(attempt.saturating_mul(attempt))
        .min(RETRY_PAUSE_CAP)
}

pub struct DurableEventPipeline {
    store: Arc<dyn EventStore>,
    stream: Arc<dyn EventStream>,
    clock: Arc<dyn Clock>,
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
    consumer_group: String,
    batch_size: usize,
    block: Duration,
    max_attempts: u32,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DurableEventPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        stream: Arc<dyn EventStream>,
        clock: Arc<dyn Clock>,
        consumer_group: impl Into<String>,
        batch_size: usize,
        block_ms: u64,
        max_attempts: u32,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            stream,
            clock,
            subscribers: Mutex::new(Vec::new()),
            consumer_group: consumer_group.into(),
            batch_size,
            block: Duration::from_millis(block_ms),
            max_attempts: max_attempts.max(1),
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Republish outbox rows whose stream append was never confirmed
    pub async fn recover(&self) -> ApiResult<usize> {
        let pending = self.store.outbox_unpublished().await?;
        let count = pending.len();
        for event in pending {
            let payload = serde_json::to_vec(&event)?;
            let stream_id = self.stream.append(payload).await?;
            self.store
                .outbox_mark_published(&event.id, &stream_id, self.clock.now())
                .await?;
            tracing::info!(event_id = %event.id, stream_id = %stream_id, "recovered unpublished event");
        }
        Ok(count)
    }

    /// Start the consumer loop; at most once per process
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("consumer loop already started; ignoring");
            return;
        }

        let pipeline = self;
        tokio::spawn(async move {
            tracing::info!(
                consumer_group = %pipeline.consumer_group,
                "starting event consumer loop"
            );
            let mut shutdown = pipeline.shutdown_rx.clone();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("event consumer loop stopping");
                        break;
                    }
                    fetched = pipeline.stream.fetch(
                        &pipeline.consumer_group,
                        pipeline.batch_size,
                        pipeline.block,
                    ) => {
                        match fetched {
                            Ok(messages) => {
                                for message in messages {
                                    pipeline.handle_message(message).await;
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "stream fetch failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Signal the consumer loop to stop (graceful shutdown)
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn handle_message(&self, message: event_bus::PendingEvent) {
        let event: PaymentEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                // Malformed payloads can never succeed; ack so they do not
                // poison the group
                tracing::error!(
                    stream_id = %message.stream_id,
                    error = %e,
                    "dropping undecodable stream message"
                );
                metrics::EVENTS_CONSUMED.with_label_values(&["undecodable"]).inc();
                let _ = message.ack().await;
                return;
            }
        };

        let claimed = match self
            .store
            .inbox_insert(&self.consumer_group, &event.id)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "inbox claim failed");
                return; // unacked: redelivered later
            }
        };
        if !claimed {
            tracing::debug!(event_id = %event.id, "duplicate delivery skipped");
            metrics::EVENTS_CONSUMED.with_label_values(&["duplicate"]).inc();
            let _ = message.ack().await;
            return;
        }

        match self.run_subscribers(&event).await {
            Ok(()) => {
                metrics::EVENTS_CONSUMED.with_label_values(&["ok"]).inc();
                if let Err(e) = message.ack().await {
                    tracing::error!(event_id = %event.id, error = %e, "ack failed");
                }
            }
            Err(error) => {
                tracing::error!(
                    event_id = %event.id,
                    error = %error,
                    "subscribers failed; releasing inbox claim for redelivery"
                );
                metrics::EVENTS_CONSUMED.with_label_values(&["error"]).inc();
                if let Err(e) = self
                    .store
                    .inbox_delete(&self.consumer_group, &event.id)
                    .await
                {
                    tracing::error!(event_id = %event.id, error = %e, "inbox release failed");
                }
                // Not acked: the stream redelivers
            }
        }
    }

    /// Drive the subscriber chain to completion for one delivery
    ///
    /// Subscribers run in registration order. A failure pauses the chain;
    /// the next pass resumes at the subscriber that failed, so earlier
    /// subscribers see the event once per delivery. After `max_attempts`
    /// passes the chain is abandoned and the error of the blocking
    /// subscriber is returned.
    async fn run_subscribers(&self, event: &PaymentEvent) -> Result<(), String> {
        let subscribers: Vec<Arc<dyn EventSubscriber>> =
            self.subscribers.lock().unwrap().clone();

        let mut next = 0;
        let mut blocked = String::new();
        for attempt in 1..=self.max_attempts {
            while let Some(subscriber) = subscribers.get(next) {
                match subscriber.on_event(event).await {
                    Ok(()) => next += 1,
                    Err(e) => {
                        blocked = format!("{}: {e:#}", subscriber.name());
                        break;
                    }
                }
            }
            if next == subscribers.len() {
                return Ok(());
            }
            if attempt < self.max_attempts {
                let pause = retry_pause(attempt);
                tracing::warn!(
                    event_id = %event.id,
                    subscriber = %subscribers[next].name(),
                    attempt = attempt,
                    max_attempts = self.max_attempts,
                    pause_ms = pause.as_millis(),
                    error = %blocked,
                    "subscriber failed, resuming chain after pause"
                );
                tokio::time::sleep(pause).await;
            }
        }
        Err(blocked)
    }
}

#[async_trait]
impl EventPipeline for DurableEventPipeline {
    async fn publish(&self, event: PaymentEvent) -> ApiResult<()> {
        self.store.outbox_insert(&event).await?;
        let payload = serde_json::to_vec(&event)?;
        let stream_id = self.stream.append(payload).await?;
        self.store
            .outbox_mark_published(&event.id, &stream_id, self.clock.now())
            .await?;

        metrics::EVENTS_PUBLISHED.inc();
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type.as_str(),
            stream_id = %stream_id,
            "event published"
        );
        Ok(())
    }

    fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    async fn list_published(
        &self,
        filter: &EventFilter,
        query: &ListQuery,
    ) -> ApiResult<Page<PaymentEvent>> {
        self.store.list_published(filter, query).await
    }
}
