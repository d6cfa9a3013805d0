//! Invoice routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use kennel_billing::{
    GenerateInvoice, Invoice, InvoiceDetail, InvoiceQuery, ManualInvoice, Payment, UpdateInvoice,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct InvoiceResponse<T> {
    pub invoice: T,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<Invoice>,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

/// POST /invoices/generate
pub async fn generate_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(request): ApiJson<GenerateInvoice>,
) -> ApiResult<(StatusCode, Json<InvoiceResponse<InvoiceDetail>>)> {
    let invoice = state
        .billing
        .builder
        .generate_invoice(&auth_user.caller(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(InvoiceResponse { invoice })))
}

/// POST /invoices
pub async fn create_manual_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(request): ApiJson<ManualInvoice>,
) -> ApiResult<(StatusCode, Json<InvoiceResponse<InvoiceDetail>>)> {
    let invoice = state
        .billing
        .builder
        .create_manual_invoice(&auth_user.caller(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(InvoiceResponse { invoice })))
}

/// GET /invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<InvoiceQuery>,
) -> ApiResult<Json<InvoiceListResponse>> {
    let invoices = state
        .billing
        .lifecycle
        .list_invoices(&auth_user.caller(), query)
        .await?;
    Ok(Json(InvoiceListResponse { invoices }))
}

/// GET /invoices/{id}
pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(invoice_id): ApiPath<Uuid>,
) -> ApiResult<Json<InvoiceResponse<InvoiceDetail>>> {
    let invoice = state
        .billing
        .lifecycle
        .get_invoice(&auth_user.caller(), invoice_id)
        .await?;
    Ok(Json(InvoiceResponse { invoice }))
}

/// PATCH /invoices/{id}
pub async fn update_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(invoice_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<UpdateInvoice>,
) -> ApiResult<Json<InvoiceResponse<Invoice>>> {
    let invoice = state
        .billing
        .lifecycle
        .update_invoice(&auth_user.caller(), invoice_id, update)
        .await?;
    Ok(Json(InvoiceResponse { invoice }))
}

/// DELETE /invoices/{id}
pub async fn delete_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(invoice_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    state
        .billing
        .lifecycle
        .delete_invoice(&auth_user.caller(), invoice_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /invoices/{id}/pay
pub async fn pay_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(invoice_id): ApiPath<Uuid>,
) -> ApiResult<Json<CheckoutResponse>> {
    let session = state
        .billing
        .checkout
        .create_invoice_checkout(&auth_user.caller(), invoice_id)
        .await?;
    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

/// GET /invoices/{id}/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(invoice_id): ApiPath<Uuid>,
) -> ApiResult<Json<PaymentListResponse>> {
    let payments = state
        .billing
        .lifecycle
        .list_payments(&auth_user.caller(), invoice_id)
        .await?;
    Ok(Json(PaymentListResponse { payments }))
}
