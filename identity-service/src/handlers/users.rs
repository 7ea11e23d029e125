use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::{admin::RoleAssignmentResponse, ErrorResponse},
    middleware::AuthUser,
    models::{AccountResponse, RequestContext},
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account", body = AccountResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    Ok(Json(state.services.accounts.get(id).await?.sanitized()))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/activate",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account activated", body = AccountResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn activate_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .services
        .accounts
        .set_active(id, true, &ctx, principal.account_id)
        .await?;
    Ok(Json(account.sanitized()))
}

/// Deactivate an account and end its sessions
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account deactivated", body = AccountResponse),
        (status = 403, description = "Superuser", body = ErrorResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .services
        .accounts
        .set_active(id, false, &ctx, principal.account_id)
        .await?;
    Ok(Json(account.sanitized()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 403, description = "Superuser", body = ErrorResponse),
        (status = 404, description = "No such account", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .accounts
        .delete(id, &ctx, principal.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/roles/{role_id}",
    params(
        ("id" = Uuid, Path, description = "Account id"),
        ("role_id" = Uuid, Path, description = "Role id")
    ),
    responses(
        (status = 200, description = "Role held", body = RoleAssignmentResponse),
        (status = 404, description = "No such account or role", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RoleAssignmentResponse>, AppError> {
    let changed = state
        .services
        .permissions
        .assign_role(id, role_id, &ctx, principal.account_id)
        .await?;
    Ok(Json(RoleAssignmentResponse {
        account_id: id,
        role_id,
        changed,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}/roles/{role_id}",
    params(
        ("id" = Uuid, Path, description = "Account id"),
        ("role_id" = Uuid, Path, description = "Role id")
    ),
    responses(
        (status = 200, description = "Role not held", body = RoleAssignmentResponse),
        (status = 404, description = "No such account or role", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn remove_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RoleAssignmentResponse>, AppError> {
    let changed = state
        .services
        .permissions
        .remove_role(id, role_id, &ctx, principal.account_id)
        .await?;
    Ok(Json(RoleAssignmentResponse {
        account_id: id,
        role_id,
        changed,
    }))
}
