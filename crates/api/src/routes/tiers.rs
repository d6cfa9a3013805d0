//! Training-content tier routes

use axum::{
    extract::{Extension, State},
    Json,
};
use kennel_billing::TierAccess;
use uuid::Uuid;

use crate::{
    auth::AuthUser, error::ApiResult, extract::ApiPath, routes::invoices::CheckoutResponse,
    state::AppState,
};

/// POST /tiers/{id}/checkout
pub async fn create_tier_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(tier_id): ApiPath<Uuid>,
) -> ApiResult<Json<CheckoutResponse>> {
    let session = state
        .billing
        .checkout
        .create_tier_checkout(&auth_user.caller(), tier_id)
        .await?;
    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

/// GET /tiers/{id}/access
pub async fn get_tier_access(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(tier_id): ApiPath<Uuid>,
) -> ApiResult<Json<TierAccess>> {
    let access = state
        .billing
        .ledger
        .tier_access(&auth_user.caller(), tier_id)
        .await?;
    Ok(Json(access))
}
