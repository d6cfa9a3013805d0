//! Application state

use std::sync::Arc;

use axum::extract::FromRef;
use kennel_billing::{BillingService, InvariantChecker};

use crate::auth::JwtManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub jwt_manager: JwtManager,
    /// Database-backed consistency checks; absent when running without Postgres
    pub invariants: Option<InvariantChecker>,
}

impl AppState {
    pub fn new(
        billing: BillingService,
        jwt_manager: JwtManager,
        invariants: Option<InvariantChecker>,
    ) -> Self {
        Self {
            billing: Arc::new(billing),
            jwt_manager,
            invariants,
        }
    }
}

impl FromRef<AppState> for JwtManager {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_manager.clone()
    }
}
