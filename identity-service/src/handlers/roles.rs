use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{CreateRoleRequest, UpdateRoleRequest},
        ErrorResponse,
    },
    middleware::AuthUser,
    models::{RequestContext, RoleWithPermissions},
    services::RoleUpdate,
    utils::ValidatedJson,
    AppState,
};

/// List roles with their permissions
#[utoipa::path(
    get,
    path = "/api/v1/roles",
    responses((status = 200, description = "All roles", body = [RoleWithPermissions])),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
) -> Result<Json<Vec<RoleWithPermissions>>, AppError> {
    Ok(Json(state.services.permissions.list_roles().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = RoleWithPermissions),
        (status = 404, description = "No such role", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoleWithPermissions>, AppError> {
    Ok(Json(state.services.permissions.get_role(id).await?))
}

/// Create a role with an initial permission set
#[utoipa::path(
    post,
    path = "/api/v1/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleWithPermissions),
        (status = 404, description = "Unknown permission id", body = ErrorResponse),
        (status = 409, description = "Name taken", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = state
        .services
        .permissions
        .create_role(
            req.name,
            req.description,
            &req.permission_ids,
            &ctx,
            principal.account_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Update a role; system roles are read-only
#[utoipa::path(
    put,
    path = "/api/v1/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleWithPermissions),
        (status = 403, description = "System role", body = ErrorResponse),
        (status = 404, description = "No such role or permission", body = ErrorResponse),
        (status = 409, description = "Name taken", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<Json<RoleWithPermissions>, AppError> {
    let update = RoleUpdate {
        name: req.name,
        description: req.description,
        permission_ids: req.permission_ids,
    };
    let role = state
        .services
        .permissions
        .update_role(id, update, &ctx, principal.account_id)
        .await?;
    Ok(Json(role))
}

/// Delete an unused, non-system role
#[utoipa::path(
    delete,
    path = "/api/v1/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 403, description = "System role", body = ErrorResponse),
        (status = 409, description = "Role still assigned", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .permissions
        .delete_role(id, &ctx, principal.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
