//! Payment processor webhook endpoint
//!
//! Unauthenticated; the signature header is the only credential. Signature
//! and payload problems answer 400 so the processor does not retry; any
//! processing failure answers 500 so it does.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use kennel_billing::{BillingError, WebhookOutcome};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /webhooks/payments
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let payload = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("Webhook body is not valid UTF-8".to_string()))?;

    match state.billing.webhooks.handle(payload, signature).await {
        Ok(outcome) => Ok(Json(json!({
            "received": true,
            "duplicate": outcome == WebhookOutcome::Duplicate,
        }))),
        Err(err @ (BillingError::WebhookSignatureInvalid | BillingError::WebhookPayload(_))) => {
            tracing::warn!(error = %err, "Rejected webhook delivery");
            Err(err.into())
        }
        Err(err) => Err(ApiError::Internal(format!("Webhook processing failed: {}", err))),
    }
}
