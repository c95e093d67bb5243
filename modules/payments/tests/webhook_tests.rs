//! Webhook dispatch, dead-letter, and replay flows

mod common;

use common::harness;
use serde_json::json;

use payments_rs::events::{EventPipeline, EventType, PaymentEvent};
use payments_rs::models::{DeadLetterStatus, DeliveryStatus};
use payments_rs::repos::{DeadLetterFilter, DeliveryFilter, ListQuery, WebhookRepository};
use payments_rs::services::webhook_service::{
    endpoint_etag, CreateEndpointRequest, IfMatch, ReplayBatchRequest, UpdateEndpointRequest,
};
use payments_rs::webhooks::signature;
use payments_rs::webhooks::SendOutcome;

fn event(event_type: EventType) -> PaymentEvent {
    PaymentEvent::new(
        event_type,
        chrono::Utc::now(),
        json!({"payment_intent_id": "pi_1"}),
    )
}

async fn endpoint_with_url(
    h: &common::Harness,
    url: &str,
) -> payments_rs::models::WebhookEndpoint {
    h.webhook_service
        .create_endpoint(CreateEndpointRequest {
            url: url.to_string(),
            events: vec![],
            enabled: true,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn delivery_is_signed_and_recorded() {
    let h = harness();
    let endpoint = endpoint_with_url(&h, "https://receiver.example/hook").await;

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();

    let sent = h.sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let delivery = &sent[0];
    assert_eq!(delivery.url, "https://receiver.example/hook");

    let header = |name: &str| -> String {
        delivery
            .headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("missing header {name}"))
    };
    assert_eq!(header("Content-Type"), "application/json");
    assert_eq!(header("X-PMC-Event"), "payment_intent.created");
    assert!(header("X-PMC-Event-Id").starts_with("evt_"));
    assert_eq!(
        header("X-PMC-Signature-Key-Id"),
        signature::key_id(&endpoint.secret)
    );
    assert!(signature::verify(
        &endpoint.secret,
        &header("X-PMC-Timestamp"),
        &delivery.body,
        &header("X-PMC-Signature"),
    ));

    let deliveries = h
        .webhook_repo
        .list_deliveries(&DeliveryFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(deliveries.items.len(), 1);
    assert_eq!(deliveries.items[0].status, DeliveryStatus::Succeeded);
    assert!(deliveries.items[0].delivered_at.is_some());
}

#[tokio::test]
async fn event_type_subscriptions_filter_dispatch() {
    let h = harness();
    endpoint_with_url(&h, "https://all.example/hook").await;
    h.webhook_service
        .create_endpoint(CreateEndpointRequest {
            url: "https://refunds.example/hook".to_string(),
            events: vec!["refund.succeeded".to_string()],
            enabled: true,
        })
        .await
        .unwrap();
    h.webhook_service
        .create_endpoint(CreateEndpointRequest {
            url: "https://disabled.example/hook".to_string(),
            events: vec![],
            enabled: false,
        })
        .await
        .unwrap();

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();

    let urls: Vec<String> = h
        .sender
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.url.clone())
        .collect();
    assert_eq!(urls, vec!["https://all.example/hook".to_string()]);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts_then_dead_letter_then_replay() {
    let h = harness();
    let endpoint = endpoint_with_url(&h, "https://flaky.example/hook").await;
    // Always-fail transient target
    h.sender
        .script("https://flaky.example/hook", SendOutcome::status(503));

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();

    // max_attempts=3: exactly 3 failed delivery records
    let deliveries = h
        .webhook_repo
        .list_deliveries(&DeliveryFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(deliveries.items.len(), 3);
    assert!(deliveries
        .items
        .iter()
        .all(|d| d.status == DeliveryStatus::Failed));
    let mut attempts: Vec<i32> = deliveries.items.iter().map(|d| d.attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2, 3]);

    // Exactly one pending dead letter
    let dead_letters = h
        .webhook_repo
        .list_dead_letters(&DeadLetterFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(dead_letters.items.len(), 1);
    let dead_letter = &dead_letters.items[0];
    assert_eq!(dead_letter.attempts, 3);
    assert_eq!(dead_letter.status, DeadLetterStatus::Pending);
    assert_eq!(dead_letter.replay_count, 0);
    assert_eq!(
        dead_letter.failure_reason.as_str(),
        "max_attempts_exhausted"
    );

    // Fix the endpoint url, then replay
    h.webhook_service
        .update_endpoint(
            &endpoint.id,
            UpdateEndpointRequest {
                url: Some("https://fixed.example/hook".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let replayed = h.webhook_service.replay(&dead_letter.id).await.unwrap();
    assert_eq!(replayed.status, DeadLetterStatus::Replayed);
    assert_eq!(replayed.replay_count, 1);
    assert_eq!(replayed.attempts, 4);
    assert!(replayed.last_replayed_at.is_some());

    // Replaying again is a conflict
    let err = h.webhook_service.replay(&dead_letter.id).await.unwrap_err();
    assert_eq!(err.code, "dead_letter_already_replayed");
}

#[tokio::test]
async fn permanent_failures_do_not_retry() {
    let h = harness();
    endpoint_with_url(&h, "https://gone.example/hook").await;
    h.sender
        .script("https://gone.example/hook", SendOutcome::status(410));

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();

    assert_eq!(h.sender.sent_count(), 1, "no retry after a permanent 4xx");

    let dead_letters = h
        .webhook_repo
        .list_dead_letters(&DeadLetterFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(dead_letters.items.len(), 1);
    assert_eq!(
        dead_letters.items[0].failure_reason.as_str(),
        "permanent_failure"
    );
    assert_eq!(dead_letters.items[0].attempts, 1);
}

#[tokio::test]
async fn retryable_4xx_statuses_do_retry() {
    let h = harness();
    endpoint_with_url(&h, "https://throttled.example/hook").await;
    h.sender
        .script("https://throttled.example/hook", SendOutcome::status(429));

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();

    assert_eq!(h.sender.sent_count(), 3, "429 is retryable");
}

#[tokio::test]
async fn replay_against_disabled_endpoint_is_rejected() {
    let h = harness();
    let endpoint = endpoint_with_url(&h, "https://off.example/hook").await;
    h.sender
        .script("https://off.example/hook", SendOutcome::status(500));

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();
    let dead_letter = h
        .webhook_repo
        .list_dead_letters(&DeadLetterFilter::default(), &ListQuery::first(1))
        .await
        .unwrap()
        .items
        .remove(0);

    h.webhook_service
        .update_endpoint(
            &endpoint.id,
            UpdateEndpointRequest {
                enabled: Some(false),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let err = h.webhook_service.replay(&dead_letter.id).await.unwrap_err();
    assert_eq!(err.code, "webhook_endpoint_disabled");
}

#[tokio::test]
async fn failed_replay_refreshes_the_dead_letter() {
    let h = harness();
    endpoint_with_url(&h, "https://still-broken.example/hook").await;
    h.sender.script(
        "https://still-broken.example/hook",
        SendOutcome::status(503),
    );

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();
    let dead_letter = h
        .webhook_repo
        .list_dead_letters(&DeadLetterFilter::default(), &ListQuery::first(1))
        .await
        .unwrap()
        .items
        .remove(0);

    let after = h.webhook_service.replay(&dead_letter.id).await.unwrap();
    assert_eq!(after.status, DeadLetterStatus::Pending);
    assert_eq!(after.replay_count, 1);
    assert_eq!(after.attempts, dead_letter.attempts + 1);
    assert!(after.failed_at > dead_letter.failed_at || after.failed_at == dead_letter.failed_at);
}

#[tokio::test]
async fn batch_replay_reports_per_item_outcomes() {
    let h = harness();
    endpoint_with_url(&h, "https://a.example/hook").await;
    endpoint_with_url(&h, "https://b.example/hook").await;
    h.sender.script("https://a.example/hook", SendOutcome::status(500));
    h.sender.script("https://b.example/hook", SendOutcome::status(500));

    h.pipeline
        .publish(event(EventType::PaymentIntentCreated))
        .await
        .unwrap();
    let dead_letters = h
        .webhook_repo
        .list_dead_letters(&DeadLetterFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(dead_letters.items.len(), 2);

    // One endpoint recovers, the other stays down
    h.sender.script("https://a.example/hook", SendOutcome::status(200));

    let report = h
        .webhook_service
        .replay_batch(ReplayBatchRequest {
            limit: 10,
            status: None,
            event_type: None,
            endpoint_id: None,
        })
        .await
        .unwrap();

    assert_eq!(report["summary"]["processed"], 2);
    assert_eq!(report["summary"]["replayed"], 1);
    assert_eq!(report["summary"]["failed"], 1);
    assert_eq!(report["summary"]["has_more"], false);

    // Default filter is pending: the replayed one is no longer eligible
    let second = h
        .webhook_service
        .replay_batch(ReplayBatchRequest {
            limit: 10,
            status: None,
            event_type: None,
            endpoint_id: None,
        })
        .await
        .unwrap();
    assert_eq!(second["summary"]["processed"], 1);
}

#[tokio::test]
async fn batch_replay_validates_the_limit() {
    let h = harness();
    let err = h
        .webhook_service
        .replay_batch(ReplayBatchRequest {
            limit: 0,
            status: None,
            event_type: None,
            endpoint_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_replay_batch");
}

#[tokio::test]
async fn endpoint_updates_honor_if_match() {
    let h = harness();
    let endpoint = endpoint_with_url(&h, "https://etag.example/hook").await;
    let etag = endpoint_etag(&endpoint);

    // Star always matches
    h.webhook_service
        .update_endpoint(
            &endpoint.id,
            UpdateEndpointRequest {
                enabled: Some(false),
                ..Default::default()
            },
            Some(IfMatch::Any),
        )
        .await
        .unwrap();

    // The old tag no longer matches after the update
    let err = h
        .webhook_service
        .update_endpoint(
            &endpoint.id,
            UpdateEndpointRequest {
                enabled: Some(true),
                ..Default::default()
            },
            Some(IfMatch::Tag(etag)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "precondition_failed");
    assert_eq!(err.status.as_u16(), 412);

    // The current tag matches
    let current = h.webhook_service.get_endpoint(&endpoint.id).await.unwrap();
    h.webhook_service
        .update_endpoint(
            &endpoint.id,
            UpdateEndpointRequest {
                enabled: Some(true),
                ..Default::default()
            },
            Some(IfMatch::Tag(endpoint_etag(&current))),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn rotate_secret_changes_signing_key() {
    let h = harness();
    let endpoint = endpoint_with_url(&h, "https://rotate.example/hook").await;
    let rotated = h
        .webhook_service
        .rotate_secret(&endpoint.id, None)
        .await
        .unwrap();
    assert_ne!(rotated.secret, endpoint.secret);
    assert_ne!(
        signature::key_id(&rotated.secret),
        signature::key_id(&endpoint.secret)
    );
    // ETag covers only stable fields, so rotation leaves it unchanged
    assert_eq!(endpoint_etag(&rotated), endpoint_etag(&endpoint));
}
