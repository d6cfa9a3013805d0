//! Live-support subscription routes

use axum::{
    extract::{Extension, State},
    Json,
};
use kennel_billing::{Subscription, SubscriptionView};
use serde::Serialize;

use crate::{auth::AuthUser, error::ApiResult, routes::invoices::CheckoutResponse, state::AppState};

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Subscription,
}

/// POST /subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CheckoutResponse>> {
    let session = state
        .billing
        .checkout
        .create_subscription_checkout(&auth_user.caller())
        .await?;
    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

/// GET /subscriptions
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionView>> {
    let view = state
        .billing
        .ledger
        .subscription_status(auth_user.user_id)
        .await?;
    Ok(Json(view))
}

/// DELETE /subscriptions
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .billing
        .ledger
        .cancel_subscription(&auth_user.caller())
        .await?;
    Ok(Json(SubscriptionResponse { subscription }))
}
