//! Service record routes (admin)

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use kennel_billing::{BillableRecord, NewServiceRecord, ServicePeriod, ServiceRecord};
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninvoicedQuery {
    pub period_start: Option<Date>,
    pub period_end: Option<Date>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecordResponse {
    pub service_record: ServiceRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UninvoicedLine {
    #[serde(flatten)]
    pub record: BillableRecord,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct UninvoicedResponse {
    pub records: Vec<UninvoicedLine>,
}

/// POST /service-records
pub async fn record_service(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(input): ApiJson<NewServiceRecord>,
) -> ApiResult<(StatusCode, Json<ServiceRecordResponse>)> {
    let service_record = state
        .billing
        .records
        .record_service(&auth_user.caller(), input)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ServiceRecordResponse { service_record }),
    ))
}

/// GET /clients/{id}/uninvoiced
pub async fn list_uninvoiced(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    ApiPath(client_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<UninvoicedQuery>,
) -> ApiResult<Json<UninvoicedResponse>> {
    let period = ServicePeriod::new(query.period_start, query.period_end)?;
    let records = state
        .billing
        .records
        .list_uninvoiced(&auth_user.caller(), client_id, period)
        .await?
        .into_iter()
        .map(|record| UninvoicedLine {
            description: record.description(),
            record,
        })
        .collect();
    Ok(Json(UninvoicedResponse { records }))
}
