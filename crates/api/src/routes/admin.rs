//! Admin billing routes

use axum::{extract::State, Json};
use kennel_billing::{InvariantCheckSummary, InvariantChecker};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    extract::ApiQuery,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct InvariantsQuery {
    /// Run only this check
    pub check: Option<String>,
}

/// GET /admin/billing/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<InvariantsQuery>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let checker = state.invariants.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Invariant checks need a database connection".to_string())
    })?;

    let summary = match query.check.as_deref() {
        Some(name) => {
            if !InvariantChecker::available_checks().iter().any(|c| *c == name) {
                return Err(ApiError::validation(
                    Some("check"),
                    format!("Unknown invariant check: {}", name),
                ));
            }
            let violations = checker.run_check(name).await?;
            InvariantCheckSummary::from_violations(OffsetDateTime::now_utc(), 1, violations)
        }
        None => checker.run_all_checks().await?,
    };

    if !summary.healthy {
        tracing::warn!(
            checks_failed = summary.checks_failed,
            violations = summary.violations.len(),
            "Billing invariant violations found"
        );
    }

    Ok(Json(summary))
}
