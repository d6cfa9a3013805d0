//! Shared harness: the real router over in-memory billing doubles
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use kennel_api::{auth::JwtManager, create_router, AppState};
use kennel_billing::testing::{FakeGateway, MemoryBillingStore, RecordingNotifier};
use kennel_billing::{BillingService, Role};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret-that-is-at-least-32-characters-long";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryBillingStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub jwt: JwtManager,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryBillingStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let billing = BillingService::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            "https://app.test",
        );
        let jwt = JwtManager::new(JWT_SECRET, 1);
        let state = AppState::new(billing, jwt.clone(), None);

        Self {
            router: create_router(state),
            store,
            gateway,
            notifier,
            jwt,
        }
    }

    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        self.jwt.generate_access_token(user_id, role).unwrap()
    }

    pub fn admin_token(&self) -> String {
        self.token(Uuid::new_v4(), Role::Admin)
    }

    /// Send a request and return the status with the parsed JSON body
    /// (`Value::Null` when the body is empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
