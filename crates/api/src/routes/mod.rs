//! HTTP routes

pub mod admin;
pub mod invoices;
pub mod records;
pub mod subscriptions;
pub mod tiers;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::{require_admin, require_auth};
use crate::state::AppState;

/// Build the application router. Layers for CORS and tracing are added by
/// the binary so tests can drive the bare router.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/webhooks/payments", post(webhooks::payment_webhook));

    let authenticated = Router::new()
        .route(
            "/invoices",
            get(invoices::list_invoices).post(invoices::create_manual_invoice),
        )
        .route("/invoices/generate", post(invoices::generate_invoice))
        .route(
            "/invoices/{id}",
            get(invoices::get_invoice)
                .patch(invoices::update_invoice)
                .delete(invoices::delete_invoice),
        )
        .route("/invoices/{id}/pay", post(invoices::pay_invoice))
        .route("/invoices/{id}/payments", get(invoices::list_payments))
        .route("/service-records", post(records::record_service))
        .route("/clients/{id}/uninvoiced", get(records::list_uninvoiced))
        .route(
            "/subscriptions",
            get(subscriptions::get_subscription)
                .post(subscriptions::create_subscription)
                .delete(subscriptions::cancel_subscription),
        )
        .route("/tiers/{id}/checkout", post(tiers::create_tier_checkout))
        .route("/tiers/{id}/access", get(tiers::get_tier_access))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route("/admin/billing/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(admin)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
