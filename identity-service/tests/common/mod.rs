//! Shared setup for identity-service HTTP tests.
//!
//! Every test gets its own router over a fresh in-memory store, so tests
//! never share accounts, sessions, or rate-limit windows.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::AuthConfig,
    models::RequestContext,
    repository::MemoryStore,
    services::{permissions::ADMINISTRATOR_ROLE, Services},
    AppState,
};
use serde_json::Value;
use service_core::rate_limit::SlidingWindowLimiter;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "Str0ng!Pass";
const JWT_SECRET: &str = "integration-test-secret-with-32-bytes!!";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::defaults(JWT_SECRET);
    config.log_level = "error".to_string();
    // Keep argon2 cheap in tests.
    config.password.hash_memory_kib = 1024;
    config.password.hash_iterations = 1;
    config
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AuthConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let services =
            Services::new(store.clone(), &config).expect("Failed to build services");
        services
            .permissions
            .seed_defaults()
            .await
            .expect("Failed to seed roles");

        let state = AppState::new(config, services, SlidingWindowLimiter::in_memory(), None);
        let router = build_router(state.clone());

        TestApp {
            router,
            state,
            store,
        }
    }

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

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("Failed to build request"))
            .await
            .expect("Router failed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    /// Registers `email` with [`PASSWORD`] and returns the account id.
    pub async fn register(&self, email: &str) -> Uuid {
        let (status, body) = self
            .post(
                "/api/v1/auth/register",
                None,
                serde_json::json!({
                    "email": email,
                    "display_name": "Test User",
                    "password": PASSWORD,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("register response carries an id")
    }

    /// Logs in with [`PASSWORD`] and returns the full token pair body.
    pub async fn login(&self, email: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/v1/auth/login",
                None,
                serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body
    }

    pub async fn access_token(&self, email: &str) -> String {
        self.login(email).await["access_token"]
            .as_str()
            .expect("access token")
            .to_string()
    }

    pub async fn make_admin(&self, account_id: Uuid) {
        let permissions = &self.state.services.permissions;
        let role = permissions
            .find_role_by_name(ADMINISTRATOR_ROLE)
            .await
            .expect("Administrator role seeded");
        permissions
            .assign_role(
                account_id,
                role.id,
                &RequestContext::default(),
                account_id,
            )
            .await
            .expect("Failed to assign role");
    }
}
