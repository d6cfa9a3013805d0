#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use kennel_billing::{BillingStore, CheckoutMode, InvoiceStatus, Role};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_generate_invoice_from_recorded_services() {
    let app = TestApp::new();
    let admin = app.admin_token();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let dog = app.store.seed_dog(client.id, "Biscuit");
    let lesson = app.store.seed_service_type("Private lesson", 7500);

    for day in ["2024-03-04", "2024-03-11"] {
        let (status, body) = app
            .request(
                Method::POST,
                "/service-records",
                Some(&admin),
                Some(json!({
                    "serviceTypeId": lesson.id,
                    "dogId": dog.id,
                    "serviceDate": day,
                    "durationMinutes": 60
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["serviceRecord"]["totalCents"], 7500);
    }

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/clients/{}/uninvoiced", client.id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["records"][0]["description"],
        "Private lesson - Biscuit (2024-03-04)"
    );

    let (status, body) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&admin),
            Some(json!({ "clientId": client.id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice = &body["invoice"];
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["subtotalCents"], 15000);
    assert_eq!(invoice["totalCents"], 15000);
    assert_eq!(invoice["amountPaidCents"], 0);
    assert_eq!(invoice["items"].as_array().unwrap().len(), 2);
    assert!(invoice["invoiceNumber"].as_str().unwrap().starts_with("INV-"));
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/invoices/{}", invoice_id),
            Some(&admin),
            Some(json!({ "status": "SENT" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["invoice"]["status"], "SENT");
    assert_eq!(app.notifier.messages().len(), 1);

    // Everything is invoiced now.
    let (status, body) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&admin),
            Some(json!({ "clientId": client.id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no_eligible_records");
    assert_eq!(app.store.invoice_count(), 1);
}

#[tokio::test]
async fn test_generate_invoice_without_records() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);

    let (status, body) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&app.admin_token()),
            Some(json!({ "clientId": client.id })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no_eligible_records");
    assert_eq!(app.store.invoice_count(), 0);
}

#[tokio::test]
async fn test_generate_invoice_unknown_client() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&app.admin_token()),
            Some(json!({ "clientId": Uuid::new_v4() })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_malformed_body_reports_field() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&app.admin_token()),
            Some(json!({ "clientId": "not-a-uuid" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["issues"][0]["field"], "clientId");
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/invoices", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_client_cannot_generate_invoices() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let client = app
        .store
        .seed_client("Avery", "avery@example.com", Some(user_id));

    let (status, _) = app
        .request(
            Method::POST,
            "/invoices/generate",
            Some(&app.token(user_id, Role::Client)),
            Some(json!({ "clientId": client.id })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_client_sees_only_own_invoices() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let own = app
        .store
        .seed_client("Avery", "avery@example.com", Some(user_id));
    let other = app.store.seed_client("Blair", "blair@example.com", None);
    let mine = app
        .store
        .seed_invoice(own.id, 5000, 0, InvoiceStatus::Sent)
        .await;
    let theirs = app
        .store
        .seed_invoice(other.id, 9000, 0, InvoiceStatus::Sent)
        .await;
    let token = app.token(user_id, Role::Client);

    let (status, body) = app.request(Method::GET, "/invoices", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let invoices = body["invoices"].as_array().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["id"], mine.id.to_string());

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/invoices/{}", theirs.id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_lists_invoices_by_status() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    app.store
        .seed_invoice(client.id, 5000, 0, InvoiceStatus::Sent)
        .await;
    app.store
        .seed_invoice(client.id, 5000, 5000, InvoiceStatus::Paid)
        .await;

    let (status, body) = app
        .request(
            Method::GET,
            "/invoices?status=PAID",
            Some(&app.admin_token()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let invoices = body["invoices"].as_array().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["status"], "PAID");
}

#[tokio::test]
async fn test_update_rejects_illegal_transition() {
    let app = TestApp::new();
    let admin = app.admin_token();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 5000, 5000, InvoiceStatus::Paid)
        .await;

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/invoices/{}", invoice.id),
            Some(&admin),
            Some(json!({ "status": "SENT" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn test_update_cancels_invoice() {
    let app = TestApp::new();
    let admin = app.admin_token();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 5000, 0, InvoiceStatus::Sent)
        .await;

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/invoices/{}", invoice.id),
            Some(&admin),
            Some(json!({ "status": "CANCELLED", "notes": "Client moved away" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["invoice"]["status"], "CANCELLED");
    assert_eq!(body["invoice"]["notes"], "Client moved away");

    // Only drafts can be deleted.
    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/invoices/{}", invoice.id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn test_delete_draft_invoice() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 5000, 0, InvoiceStatus::Draft)
        .await;

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/invoices/{}", invoice.id),
            Some(&app.admin_token()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(app.store.find_invoice(invoice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pay_invoice_returns_checkout_url() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let client = app
        .store
        .seed_client("Avery", "avery@example.com", Some(user_id));
    let invoice = app
        .store
        .seed_invoice(client.id, 12000, 2000, InvoiceStatus::Partial)
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/invoices/{}/pay", invoice.id),
            Some(&app.token(user_id, Role::Client)),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["url"], "https://checkout.test/pay/cs_test_1");
    assert_eq!(body["sessionId"], "cs_test_1");

    let requests = app.gateway.checkout_requests();
    assert_eq!(requests.len(), 1);
    let CheckoutMode::Payment(lines) = &requests[0].mode else {
        panic!("invoice checkout should be a one-off payment");
    };
    let charged: i64 = lines.iter().map(|line| line.total_cents()).sum();
    assert_eq!(charged, 10000);
}

#[tokio::test]
async fn test_pay_paid_invoice_is_rejected() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 5000, 5000, InvoiceStatus::Paid)
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/invoices/{}/pay", invoice.id),
            Some(&app.admin_token()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "already_paid");
    assert!(app.gateway.checkout_requests().is_empty());
}

#[tokio::test]
async fn test_gateway_outage_is_internal_error() {
    let app = TestApp::new();
    let client = app.store.seed_client("Avery", "avery@example.com", None);
    let invoice = app
        .store
        .seed_invoice(client.id, 5000, 0, InvoiceStatus::Sent)
        .await;
    app.gateway.fail_checkout(true);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/invoices/{}/pay", invoice.id),
            Some(&app.admin_token()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
}
