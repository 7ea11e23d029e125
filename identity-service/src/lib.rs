pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{sliding_window_middleware, RateLimitContext},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use service_core::rate_limit::{Quota, RateLimitRule, RuleTable, SlidingWindowLimiter};
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::{AuthConfig, RateLimitConfig};
use crate::middleware::{auth::API_KEY_HEADER, auth_middleware, guard, require_middleware};
use crate::services::{Requirement, Services, TokenType};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::login_two_factor,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::auth::change_password,
        handlers::auth::me,
        handlers::auth::my_permissions,
        handlers::two_factor::setup,
        handlers::two_factor::verify,
        handlers::two_factor::disable,
        handlers::api_keys::create_api_key,
        handlers::api_keys::list_api_keys,
        handlers::api_keys::revoke_api_key,
        handlers::roles::list_roles,
        handlers::roles::get_role,
        handlers::roles::create_role,
        handlers::roles::update_role,
        handlers::roles::delete_role,
        handlers::permissions::list_permissions,
        handlers::permissions::create_permission,
        handlers::permissions::delete_permission,
        handlers::users::get_user,
        handlers::users::activate_user,
        handlers::users::deactivate_user,
        handlers::users::delete_user,
        handlers::users::assign_role,
        handlers::users::remove_role,
        handlers::admin::audit_logs,
        handlers::admin::user_sessions,
        handlers::admin::revoke_session,
        handlers::admin::force_logout,
        handlers::admin::cleanup_sessions,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::TwoFactorChallenge,
            dtos::auth::TwoFactorLoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::TwoFactorCodeRequest,
            dtos::auth::TwoFactorDisableRequest,
            dtos::auth::EffectivePermissionsResponse,
            dtos::admin::CreateApiKeyRequest,
            dtos::admin::CreateRoleRequest,
            dtos::admin::UpdateRoleRequest,
            dtos::admin::CreatePermissionRequest,
            dtos::admin::RoleAssignmentResponse,
            dtos::admin::CleanupResponse,
            dtos::admin::RevokedSessionsResponse,
            services::TokenPair,
            services::TwoFactorSetup,
            services::CreatedApiKey,
            models::AccountResponse,
            models::ApiKeyInfo,
            models::AuditEvent,
            models::Permission,
            models::Role,
            models::RoleWithPermissions,
            models::SessionInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login, sessions"),
        (name = "Two-Factor", description = "TOTP enrollment and backup codes"),
        (name = "API Keys", description = "Programmatic credentials"),
        (name = "Roles", description = "Role administration"),
        (name = "Permissions", description = "Permission catalog"),
        (name = "Users", description = "Account administration"),
        (name = "Admin", description = "Sessions and audit trail"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub services: Services,
    pub limiter: SlidingWindowLimiter,
    pub rate_rules: RuleTable,
    /// Absent when running on the in-memory store.
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        services: Services,
        limiter: SlidingWindowLimiter,
        db: Option<PgPool>,
    ) -> Self {
        let rate_rules = rate_limit_rules(&config.rate_limit);
        Self {
            config,
            services,
            limiter,
            rate_rules,
            db,
        }
    }
}

impl RateLimitContext for AppState {
    fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    fn rules(&self) -> &RuleTable {
        &self.rate_rules
    }

    fn token_subject(&self, headers: &HeaderMap) -> Option<String> {
        let token = middleware::auth::bearer_token(headers)?;
        let jwt = &self.services.jwt;
        jwt.verify(token, TokenType::Access)
            .or_else(|_| jwt.verify(token, TokenType::Refresh))
            .ok()
    }
}

/// Endpoint classes in match order: literal paths before the GET catch-all.
pub fn rate_limit_rules(config: &RateLimitConfig) -> RuleTable {
    let two_factor = Quota::new(config.two_factor_attempts, config.two_factor_window_seconds);
    RuleTable::new(vec![
        RateLimitRule::new(
            "login",
            Some(Method::POST),
            "/api/v1/auth/login",
            Quota::new(config.login_attempts, config.login_window_seconds),
        ),
        RateLimitRule::new(
            "login_2fa",
            Some(Method::POST),
            "/api/v1/auth/login/2fa",
            two_factor,
        ),
        RateLimitRule::new(
            "2fa_verify",
            Some(Method::POST),
            "/api/v1/auth/2fa/verify",
            two_factor,
        ),
        RateLimitRule::new(
            "2fa_disable",
            Some(Method::POST),
            "/api/v1/auth/2fa/disable",
            two_factor,
        ),
        RateLimitRule::new(
            "register",
            Some(Method::POST),
            "/api/v1/auth/register",
            Quota::new(config.register_attempts, config.register_window_seconds),
        ),
        RateLimitRule::new(
            "refresh",
            Some(Method::POST),
            "/api/v1/auth/refresh",
            Quota::new(config.refresh_attempts, config.refresh_window_seconds),
        ),
        RateLimitRule::new(
            "read",
            Some(Method::GET),
            "/api/v1/*",
            Quota::new(config.read_attempts, config.read_window_seconds),
        ),
    ])
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up; `database` reports store reachability")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db {
        Some(pool) => match db::ping(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                "unavailable"
            }
        },
        None => "in_memory",
    };
    let status = if database == "unavailable" {
        "degraded"
    } else {
        "healthy"
    };

    Json(serde_json::json!({
        "status": status,
        "service": state.config.service_name,
        "version": state.config.service_version,
        "database": database,
    }))
}

pub fn build_router(state: AppState) -> Router {
    let permission = |name: &'static str| {
        from_fn_with_state(
            guard(&state, Requirement::Permission(name)),
            require_middleware,
        )
    };

    let public_routes = Router::new()
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route(
            "/api/v1/auth/login/2fa",
            post(handlers::auth::login_two_factor),
        )
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/api/v1/auth/logout", post(handlers::auth::logout));

    // Any authenticated caller, acting on their own account
    let self_service_routes = Router::new()
        .route("/api/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route(
            "/api/v1/auth/change-password",
            post(handlers::auth::change_password),
        )
        .route("/api/v1/auth/me", get(handlers::auth::me))
        .route(
            "/api/v1/auth/me/permissions",
            get(handlers::auth::my_permissions),
        )
        .route("/api/v1/auth/2fa/setup", post(handlers::two_factor::setup))
        .route("/api/v1/auth/2fa/verify", post(handlers::two_factor::verify))
        .route(
            "/api/v1/auth/2fa/disable",
            post(handlers::two_factor::disable),
        )
        .route(
            "/api/v1/api-keys",
            post(handlers::api_keys::create_api_key).get(handlers::api_keys::list_api_keys),
        )
        .route(
            "/api/v1/api-keys/:id",
            delete(handlers::api_keys::revoke_api_key),
        );

    // Each route declares the permission it needs
    let admin_routes = Router::new()
        .route(
            "/api/v1/roles",
            get(handlers::roles::list_roles).route_layer(permission("roles.read")),
        )
        .route(
            "/api/v1/roles",
            post(handlers::roles::create_role).route_layer(permission("roles.create")),
        )
        .route(
            "/api/v1/roles/:id",
            get(handlers::roles::get_role).route_layer(permission("roles.read")),
        )
        .route(
            "/api/v1/roles/:id",
            put(handlers::roles::update_role).route_layer(permission("roles.update")),
        )
        .route(
            "/api/v1/roles/:id",
            delete(handlers::roles::delete_role).route_layer(permission("roles.delete")),
        )
        .route(
            "/api/v1/permissions",
            get(handlers::permissions::list_permissions)
                .route_layer(permission("permissions.read")),
        )
        .route(
            "/api/v1/permissions",
            post(handlers::permissions::create_permission)
                .route_layer(permission("permissions.create")),
        )
        .route(
            "/api/v1/permissions/:id",
            delete(handlers::permissions::delete_permission)
                .route_layer(permission("permissions.delete")),
        )
        .route(
            "/api/v1/users/:id",
            get(handlers::users::get_user).route_layer(permission("users.read")),
        )
        .route(
            "/api/v1/users/:id",
            delete(handlers::users::delete_user).route_layer(permission("users.delete")),
        )
        .route(
            "/api/v1/users/:id/activate",
            post(handlers::users::activate_user).route_layer(permission("users.update")),
        )
        .route(
            "/api/v1/users/:id/deactivate",
            post(handlers::users::deactivate_user).route_layer(permission("users.update")),
        )
        .route(
            "/api/v1/users/:id/roles/:role_id",
            post(handlers::users::assign_role).route_layer(permission("users.update")),
        )
        .route(
            "/api/v1/users/:id/roles/:role_id",
            delete(handlers::users::remove_role).route_layer(permission("users.update")),
        )
        .route(
            "/api/v1/admin/audit-logs",
            get(handlers::admin::audit_logs).route_layer(permission("audit.read")),
        )
        .route(
            "/api/v1/admin/users/:id/sessions",
            get(handlers::admin::user_sessions).route_layer(permission("system.admin")),
        )
        .route(
            "/api/v1/admin/sessions/:id",
            delete(handlers::admin::revoke_session).route_layer(permission("system.admin")),
        )
        .route(
            "/api/v1/admin/users/:id/force-logout",
            post(handlers::admin::force_logout).route_layer(permission("system.admin")),
        )
        .route(
            "/api/v1/admin/cleanup-sessions",
            post(handlers::admin::cleanup_sessions).route_layer(permission("system.admin")),
        );

    let protected_routes = self_service_routes
        .merge(admin_routes)
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        // Sliding-window limits ahead of authentication
        .layer(from_fn_with_state(
            state.clone(),
            sliding_window_middleware::<AppState>,
        ))
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
}
