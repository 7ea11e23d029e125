use chrono::Duration;
use service_core::{
    axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        admin::{
            AuditLogParams, CleanupParams, CleanupResponse, RevokedSessionsResponse,
            SessionListParams,
        },
        ErrorResponse,
    },
    models::{AuditEvent, AuditQuery, RequestContext, SessionInfo},
    AppState,
};

const DEFAULT_SESSION_RETENTION_DAYS: i64 = 30;

/// Audit trail, newest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/audit-logs",
    params(AuditLogParams),
    responses((status = 200, description = "Matching events", body = [AuditEvent])),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditLogParams>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    let query = AuditQuery::from(params);
    Ok(Json(state.services.audit.list(&query).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{id}/sessions",
    params(("id" = Uuid, Path, description = "Account id"), SessionListParams),
    responses((status = 200, description = "Sessions of the account", body = [SessionInfo])),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn user_sessions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<SessionListParams>,
) -> Result<Json<Vec<SessionInfo>>, AppError> {
    let sessions = state
        .services
        .sessions
        .list(id, !params.include_inactive)
        .await?;
    Ok(Json(sessions.into_iter().map(SessionInfo::from).collect()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "No such session", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.services.sessions.revoke_by_id(id, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// End every session of an account
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/force-logout",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Sessions ended", body = RevokedSessionsResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn force_logout(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    state.services.accounts.get(id).await?;
    let sessions_revoked = state.services.sessions.revoke_all(id, &ctx).await?;
    Ok(Json(RevokedSessionsResponse { sessions_revoked }))
}

/// Deactivate expired sessions and purge old inactive ones
#[utoipa::path(
    post,
    path = "/api/v1/admin/cleanup-sessions",
    params(CleanupParams),
    responses((status = 200, description = "Cleanup counts", body = CleanupResponse)),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn cleanup_sessions(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupResponse>, AppError> {
    params.validate()?;
    let retention = Duration::days(
        params
            .retention_days
            .unwrap_or(DEFAULT_SESSION_RETENTION_DAYS),
    );

    let deactivated = state.services.sessions.deactivate_expired().await?;
    let purged = state.services.sessions.purge(retention).await?;
    Ok(Json(CleanupResponse {
        deactivated,
        purged,
    }))
}
