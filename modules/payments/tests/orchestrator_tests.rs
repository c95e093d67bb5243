//! Orchestrator flows over the in-memory backends: idempotency, the intent
//! state machine, authorization failover, refunds, chargebacks, and
//! reconciliation totals

mod common;

use common::{harness, intent_body};
use serde_json::json;
use std::sync::Arc;

use payments_rs::events::{EventFilter, EventPipeline, EventType};
use payments_rs::models::{IntentStatus, LedgerEntryType};
use payments_rs::repos::{
    IntentFilter, LedgerFilter, ListQuery, PaymentRepository, RefundFilter,
};
use payments_rs::services::reconciliation_service;

async fn create_intent(
    h: &common::Harness,
    key: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let completed = h
        .orchestrator
        .create_payment_intent(key, body)
        .await
        .expect("create should succeed");
    assert_eq!(completed.status_code, 201);
    completed.body
}

#[tokio::test]
async fn create_then_replay_then_conflict() {
    let h = harness();
    let body = intent_body(10_990, "tok_test_visa", "automatic");

    let first = h
        .orchestrator
        .create_payment_intent("intent-001", body.clone())
        .await
        .unwrap();
    assert_eq!(first.status_code, 201);
    assert!(!first.replayed);
    assert_eq!(first.body["status"], "requires_confirmation");
    assert_eq!(first.body["amount"], 10_990);
    assert_eq!(first.body["captured_amount"], 0);

    // Same key, same payload: replayed, same id, no second intent
    let second = h
        .orchestrator
        .create_payment_intent("intent-001", body.clone())
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.body["id"], first.body["id"]);

    let page = h
        .repo
        .list_intents(&IntentFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1, "exactly one set of side effects");

    // Same key, different payload: conflict
    let err = h
        .orchestrator
        .create_payment_intent("intent-001", intent_body(9_999, "tok_test_visa", "automatic"))
        .await
        .unwrap_err();
    assert_eq!(err.code, "idempotency_conflict");
    assert_eq!(err.status.as_u16(), 409);
}

#[tokio::test]
async fn key_order_in_payload_does_not_conflict() {
    let h = harness();
    h.orchestrator
        .create_payment_intent(
            "intent-002",
            json!({
                "amount": 500,
                "currency": "BRL",
                "customer": {"id": "cus_123"},
                "payment_method": {"type": "card", "token": "tok_test_visa"},
            }),
        )
        .await
        .unwrap();

    let reordered = h
        .orchestrator
        .create_payment_intent(
            "intent-002",
            json!({
                "payment_method": {"token": "tok_test_visa", "type": "card"},
                "customer": {"id": "cus_123"},
                "currency": "BRL",
                "amount": 500,
            }),
        )
        .await
        .unwrap();
    assert!(reordered.replayed, "fingerprint is canonical");
}

#[tokio::test]
async fn concurrent_same_key_writes_produce_one_intent() {
    let h = Arc::new(harness());
    let body = intent_body(700, "tok_test_visa", "automatic");

    let (a, b) = tokio::join!(
        h.orchestrator.create_payment_intent("race-key", body.clone()),
        h.orchestrator.create_payment_intent("race-key", body.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.body["id"], b.body["id"]);
    assert!(a.replayed != b.replayed, "exactly one side ran the write");

    let page = h
        .repo
        .list_intents(&IntentFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn confirm_automatic_captures_in_full() {
    let h = harness();
    let created = create_intent(&h, "s2-create", intent_body(10_990, "tok_test_visa", "automatic")).await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "s2-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.status_code, 200);
    assert_eq!(confirmed.body["status"], "succeeded");
    assert_eq!(confirmed.body["captured_amount"], 10_990);
    assert_eq!(confirmed.body["refunded_amount"], 0);
    assert_eq!(confirmed.body["amount_refundable"], 10_990);

    // Ledger: authorization + capture credits
    let ledger = h
        .repo
        .list_ledger_entries(&LedgerFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    let types: Vec<LedgerEntryType> = ledger.items.iter().map(|e| e.entry_type).collect();
    assert!(types.contains(&LedgerEntryType::Authorization));
    assert!(types.contains(&LedgerEntryType::Capture));

    // Events: created, processing, succeeded
    let events = h
        .pipeline
        .list_published(&EventFilter::default(), &ListQuery::first(10))
        .await
        .unwrap();
    let mut seen: Vec<&str> = events.items.iter().map(|e| e.event_type.as_str()).collect();
    seen.sort_unstable();
    assert!(seen.contains(&"payment_intent.created"));
    assert!(seen.contains(&"payment_intent.processing"));
    assert!(seen.contains(&"payment_intent.succeeded"));

    // Confirm again under a new key: no-op returning the current state
    let again = h
        .orchestrator
        .confirm_payment_intent(id, "s2-confirm-again", json!({}))
        .await
        .unwrap();
    assert_eq!(again.body["status"], "succeeded");
    assert!(!again.replayed);
}

#[tokio::test]
async fn transient_failure_fails_over_to_next_candidate() {
    let h = harness();
    // Priority for card is [provider_b, provider_a]; provider_b is transient
    // for this token
    let created = create_intent(
        &h,
        "s3-create",
        intent_body(2_000, "tok_test_transient", "automatic"),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "s3-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "succeeded");
    assert_eq!(confirmed.body["provider"], "provider_a");
    assert_eq!(confirmed.body["provider_reference"], "auth_provider_a_1");
}

#[tokio::test]
async fn non_transient_decline_stops_the_loop() {
    let h = harness();
    let created = create_intent(&h, "decl-create", intent_body(2_000, "tok_decline", "automatic")).await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "decl-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "failed");
    // Last attempt wins: the declining provider stays on the intent
    assert_eq!(confirmed.body["provider"], "provider_b");

    let events = h
        .pipeline
        .list_published(
            &EventFilter {
                event_type: Some(EventType::PaymentIntentFailed),
                ..Default::default()
            },
            &ListQuery::first(10),
        )
        .await
        .unwrap();
    assert_eq!(events.items.len(), 1);
    assert_eq!(events.items[0].data["failure_code"], "card_declined");
}

#[tokio::test]
async fn risk_denied_customer_fails_with_event() {
    let h = harness();
    let created = create_intent(
        &h,
        "s4-create",
        json!({
            "amount": 1_000,
            "currency": "BRL",
            "customer": {"id": "blocked_001"},
            "payment_method": {"type": "card", "token": "tok_test_visa"},
        }),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "s4-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "failed");

    let events = h
        .pipeline
        .list_published(
            &EventFilter {
                event_type: Some(EventType::PaymentIntentFailed),
                ..Default::default()
            },
            &ListQuery::first(10),
        )
        .await
        .unwrap();
    assert_eq!(events.items[0].data["failure_code"], "risk_denied");
}

#[tokio::test]
async fn review_threshold_routes_to_requires_action() {
    let h = harness();
    let created = create_intent(
        &h,
        "review-create",
        intent_body(1_000_000, "tok_test_visa", "automatic"),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "review-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "requires_action");
}

#[tokio::test]
async fn manual_capture_flow_partial_then_full() {
    let h = harness();
    let created = create_intent(&h, "cap-create", intent_body(10_000, "tok_test_visa", "manual")).await;
    let id = created["id"].as_str().unwrap();

    let confirmed = h
        .orchestrator
        .confirm_payment_intent(id, "cap-confirm", json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "requires_action");
    assert_eq!(confirmed.body["authorized_amount"], 10_000);
    assert_eq!(confirmed.body["captured_amount"], 0);

    // Over-capture is rejected
    let err = h
        .orchestrator
        .capture_payment_intent(id, "cap-over", json!({"amount": 10_001}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "amount_exceeds_capturable");

    // Partial capture returns to requires_action
    let partial = h
        .orchestrator
        .capture_payment_intent(id, "cap-1", json!({"amount": 4_000}))
        .await
        .unwrap();
    assert_eq!(partial.body["status"], "requires_action");
    assert_eq!(partial.body["captured_amount"], 4_000);

    // Capturing the remainder succeeds the intent
    let full = h
        .orchestrator
        .capture_payment_intent(id, "cap-2", json!({"amount": 6_000}))
        .await
        .unwrap();
    assert_eq!(full.body["status"], "succeeded");
    assert_eq!(full.body["captured_amount"], 10_000);

    // Terminal: further captures are rejected
    let err = h
        .orchestrator
        .capture_payment_intent(id, "cap-3", json!({"amount": 1}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_payment_state");
}

#[tokio::test]
async fn capture_requires_manual_capture_method() {
    let h = harness();
    let created = create_intent(&h, "auto-create", intent_body(1_000, "tok_test_visa", "automatic")).await;
    let id = created["id"].as_str().unwrap();

    let err = h
        .orchestrator
        .capture_payment_intent(id, "auto-cap", json!({"amount": 1_000}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_capture_method");
    assert_eq!(err.status.as_u16(), 409);
}

#[tokio::test]
async fn cancel_rules() {
    let h = harness();

    // Cancelable from requires_confirmation; idempotent when repeated
    let created = create_intent(&h, "cx-create", intent_body(1_000, "tok_test_visa", "automatic")).await;
    let id = created["id"].as_str().unwrap();
    let canceled = h
        .orchestrator
        .cancel_payment_intent(id, "cx-1", json!({}))
        .await
        .unwrap();
    assert_eq!(canceled.body["status"], "canceled");
    let again = h
        .orchestrator
        .cancel_payment_intent(id, "cx-2", json!({}))
        .await
        .unwrap();
    assert_eq!(again.body["status"], "canceled");

    // Succeeded intents cannot be canceled
    let created = create_intent(&h, "cx-create2", intent_body(1_000, "tok_test_visa", "automatic")).await;
    let id = created["id"].as_str().unwrap();
    h.orchestrator
        .confirm_payment_intent(id, "cx-confirm", json!({}))
        .await
        .unwrap();
    let err = h
        .orchestrator
        .cancel_payment_intent(id, "cx-3", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_payment_state");
}

async fn succeeded_intent(h: &common::Harness, key_prefix: &str, amount: i64) -> String {
    let created = create_intent(
        h,
        &format!("{key_prefix}-create"),
        intent_body(amount, "tok_test_visa", "automatic"),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    let confirmed = h
        .orchestrator
        .confirm_payment_intent(&id, &format!("{key_prefix}-confirm"), json!({}))
        .await
        .unwrap();
    assert_eq!(confirmed.body["status"], "succeeded");
    id
}

#[tokio::test]
async fn refund_happy_path_and_over_refund() {
    let h = harness();
    let id = succeeded_intent(&h, "rf", 10_000).await;

    let refund = h
        .orchestrator
        .create_refund(
            "rf-1",
            json!({"payment_intent_id": id.clone(), "amount": 4_000, "reason": "requested_by_customer"}),
        )
        .await
        .unwrap();
    assert_eq!(refund.status_code, 201);
    assert_eq!(refund.body["status"], "succeeded");

    let intent = h.repo.get_intent(&id).await.unwrap().unwrap();
    assert_eq!(intent.refunded_amount, 4_000);
    assert_eq!(intent.amount_refundable(), 6_000);

    // Sum of refunds can never exceed captured
    let err = h
        .orchestrator
        .create_refund("rf-2", json!({"payment_intent_id": id.clone(), "amount": 6_001}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "amount_exceeds_refundable");

    let refunds = h
        .repo
        .list_refunds(
            &RefundFilter {
                payment_intent_id: Some(id.clone()),
                ..Default::default()
            },
            &ListQuery::first(10),
        )
        .await
        .unwrap();
    assert_eq!(refunds.items.len(), 1);

    // Refund ledger entry is a debit
    let ledger = h
        .repo
        .list_ledger_entries(
            &LedgerFilter {
                entry_type: Some(LedgerEntryType::Refund),
                ..Default::default()
            },
            &ListQuery::first(10),
        )
        .await
        .unwrap();
    assert_eq!(ledger.items.len(), 1);
    assert_eq!(ledger.items[0].amount, 4_000);
}

#[tokio::test]
async fn refund_requires_prior_authorization() {
    let h = harness();
    let created = create_intent(&h, "rfna", intent_body(1_000, "tok_test_visa", "automatic")).await;
    let id = created["id"].as_str().unwrap();

    let err = h
        .orchestrator
        .create_refund("rfna-1", json!({"payment_intent_id": id.clone(), "amount": 100}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "refund_not_allowed");
}

#[tokio::test]
async fn chargeback_disputable_accounting_and_resolution() {
    let h = harness();
    let id = succeeded_intent(&h, "cb", 10_000).await;

    h.orchestrator
        .create_refund("cb-refund", json!({"payment_intent_id": id.clone(), "amount": 2_000}))
        .await
        .unwrap();

    // disputable = captured - refunded = 8000
    let err = h
        .orchestrator
        .create_chargeback(
            "cb-over",
            json!({"payment_intent_id": id.clone(), "amount": 8_001, "reason": "fraud"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "amount_exceeds_disputable");

    let first = h
        .orchestrator
        .create_chargeback(
            "cb-1",
            json!({"payment_intent_id": id.clone(), "amount": 5_000, "reason": "fraud"}),
        )
        .await
        .unwrap();
    assert_eq!(first.status_code, 201);
    assert_eq!(first.body["status"], "open");
    let cb_id = first.body["id"].as_str().unwrap().to_string();

    // Open chargebacks reserve disputable funds
    let err = h
        .orchestrator
        .create_chargeback(
            "cb-2",
            json!({"payment_intent_id": id.clone(), "amount": 3_001, "reason": "other"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "amount_exceeds_disputable");

    // under_review emits no event and stays resolvable
    let reviewed = h
        .orchestrator
        .resolve_chargeback(&cb_id, "cb-rev", json!({"status": "under_review"}))
        .await
        .unwrap();
    assert_eq!(reviewed.body["status"], "under_review");

    let lost = h
        .orchestrator
        .resolve_chargeback(&cb_id, "cb-lost", json!({"status": "lost"}))
        .await
        .unwrap();
    assert_eq!(lost.body["status"], "lost");

    // Terminal resolution is idempotent on the same target, 409 otherwise
    let again = h
        .orchestrator
        .resolve_chargeback(&cb_id, "cb-lost2", json!({"status": "lost"}))
        .await
        .unwrap();
    assert_eq!(again.body["status"], "lost");
    let err = h
        .orchestrator
        .resolve_chargeback(&cb_id, "cb-won", json!({"status": "won"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_chargeback_state");

    // Lost chargebacks hit the ledger; events for opened + lost
    let ledger = h
        .repo
        .list_ledger_entries(
            &LedgerFilter {
                entry_type: Some(LedgerEntryType::Chargeback),
                ..Default::default()
            },
            &ListQuery::first(10),
        )
        .await
        .unwrap();
    assert_eq!(ledger.items.len(), 1);
    assert_eq!(ledger.items[0].amount, 5_000);

    let events = h
        .pipeline
        .list_published(&EventFilter::default(), &ListQuery::first(50))
        .await
        .unwrap();
    let types: Vec<&str> = events.items.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"chargeback.opened"));
    assert!(types.contains(&"chargeback.lost"));
    assert!(!types.contains(&"chargeback.won"));
}

#[tokio::test]
async fn reconciliation_totals_from_ledger() {
    let h = harness();
    let id = succeeded_intent(&h, "rec", 10_000).await;
    h.orchestrator
        .create_refund("rec-refund", json!({"payment_intent_id": id.clone(), "amount": 2_500}))
        .await
        .unwrap();
    let cb = h
        .orchestrator
        .create_chargeback(
            "rec-cb",
            json!({"payment_intent_id": id.clone(), "amount": 1_000, "reason": "fraud"}),
        )
        .await
        .unwrap();
    h.orchestrator
        .resolve_chargeback(
            cb.body["id"].as_str().unwrap(),
            "rec-cb-lost",
            json!({"status": "lost"}),
        )
        .await
        .unwrap();

    let repo = h.repo.clone() as Arc<dyn PaymentRepository>;
    let summary = reconciliation_service::summarize(&repo, None, None, None)
        .await
        .unwrap();
    assert_eq!(summary.captured_total, 10_000);
    assert_eq!(summary.refunded_total, 2_500);
    assert_eq!(summary.chargeback_total, 1_000);
    assert_eq!(summary.net_settled_total, 6_500);

    // Currency filter that matches nothing nets to zero
    let other = reconciliation_service::summarize(&repo, Some("USD".into()), None, None)
        .await
        .unwrap();
    assert_eq!(other.net_settled_total, 0);
}

#[tokio::test]
async fn intent_status_history_follows_the_transition_graph() {
    let h = harness();
    let id = succeeded_intent(&h, "graph", 1_000).await;
    let intent = h.repo.get_intent(&id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Succeeded);
    assert!(intent.captured_amount <= intent.authorized_amount);
    assert!(intent.authorized_amount <= intent.amount);
    assert!(intent.refunded_amount <= intent.captured_amount);
}
