#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::TestApp;
use kennel_billing::testing::sign;
use kennel_billing::{BillingStore, InvoiceStatus, Role};
use serde_json::{json, Value};
use uuid::Uuid;

fn delivery(payload: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/payments")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

fn intent_succeeded(event_id: &str, intent_id: &str, amount: i64, metadata: Value) -> String {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "created": 1_700_000_000,
        "data": { "object": {
            "id": intent_id,
            "amount": amount,
            "amount_received": amount,
            "metadata": metadata
        }}
    })
    .to_string()
}

#[tokio::test]
async fn test_missing_signature_header_is_bad_request() {
    let app = TestApp::new();
    let payload = intent_succeeded("evt_1", "pi_1", 100, json!({}));

    let (status, body) = app.send(delivery(&payload, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent)
        .await;
    let payload = intent_succeeded(
        "evt_1",
        "pi_1",
        14000,
        json!({ "purpose": "invoice", "invoice_id": invoice.id, "client_id": client.id }),
    );

    let (status, _) = app
        .send(delivery(&payload, Some("t=1700000000,v1=deadbeef")))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.store.webhook_event_seen("evt_1"));
    let unchanged = app.store.find_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(unchanged.invoice.status, InvoiceStatus::Sent);
    assert_eq!(unchanged.invoice.amount_paid_cents, 0);
}

#[tokio::test]
async fn test_payment_marks_invoice_paid_once() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let client = app
        .store
        .seed_client("Avery", "avery@example.com", Some(user_id));
    let invoice = app
        .store
        .seed_invoice(client.id, 14000, 0, InvoiceStatus::Sent)
        .await;
    let payload = intent_succeeded(
        "evt_1",
        "pi_123",
        14000,
        json!({ "purpose": "invoice", "invoice_id": invoice.id, "client_id": client.id }),
    );

    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["received"], true);
    assert_eq!(body["duplicate"], false);

    // Redelivery is acknowledged without a second credit.
    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/invoices/{}", invoice.id),
            Some(&app.token(user_id, Role::Client)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoice"]["status"], "PAID");
    assert_eq!(body["invoice"]["amountPaidCents"], 14000);
    assert!(body["invoice"]["paidAt"].is_string());

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/invoices/{}/payments", invoice.id),
            Some(&app.admin_token()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let payments = body["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["externalTransactionId"], "pi_123");
    assert_eq!(app.notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_tier_purchase_grants_access() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let tier = app.store.seed_tier("Puppy foundations", 4900);
    let token = app.token(user_id, Role::Client);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/tiers/{}/access", tier.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasAccess"], false);

    let payload = json!({
        "id": "evt_tier",
        "type": "checkout.session.completed",
        "created": 1_700_000_000,
        "data": { "object": {
            "id": "cs_tier",
            "payment_intent": "pi_tier",
            "amount_total": 4900,
            "metadata": { "purpose": "tier", "tier_id": tier.id, "user_id": user_id }
        }}
    })
    .to_string();
    let (status, _) = app.send(delivery(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/tiers/{}/access", tier.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasAccess"], true);
    assert_eq!(app.store.tier_purchase_count(user_id), 1);
}

#[tokio::test]
async fn test_unknown_tier_purchase_is_acknowledged() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let payload = intent_succeeded(
        "evt_ghost",
        "pi_ghost",
        4900,
        json!({ "purpose": "tier", "tier_id": Uuid::new_v4(), "user_id": user_id }),
    );

    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["received"], true);
    assert_eq!(app.store.tier_purchase_count(user_id), 0);
}

#[tokio::test]
async fn test_processing_failure_asks_for_redelivery() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let tier = app.store.seed_tier("Puppy foundations", 4900);
    let payload = intent_succeeded(
        "evt_retry",
        "pi_retry",
        4900,
        json!({ "purpose": "tier", "tier_id": tier.id, "user_id": user_id }),
    );

    app.store.fail_ledger_writes(true);
    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");

    app.store.fail_ledger_writes(false);
    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], false);
    assert_eq!(app.store.tier_purchase_count(user_id), 1);
}

#[tokio::test]
async fn test_unhandled_event_is_acknowledged() {
    let app = TestApp::new();
    let payload = json!({
        "id": "evt_other",
        "type": "customer.created",
        "created": 1_700_000_000,
        "data": { "object": { "id": "cus_1" } }
    })
    .to_string();

    let (status, body) = app.send(delivery(&payload, Some(&sign(&payload)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}
