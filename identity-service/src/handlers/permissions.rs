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
    dtos::{admin::CreatePermissionRequest, ErrorResponse},
    middleware::AuthUser,
    models::{Permission, RequestContext},
    utils::ValidatedJson,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/permissions",
    responses((status = 200, description = "Permission catalog", body = [Permission])),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Permission>>, AppError> {
    Ok(Json(state.services.permissions.list_permissions().await?))
}

/// Create a permission named `resource.action`
#[utoipa::path(
    post,
    path = "/api/v1/permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Already exists", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<CreatePermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let permission = state
        .services
        .permissions
        .create_permission(
            &req.resource,
            &req.action,
            req.description,
            &ctx,
            principal.account_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/permissions/{id}",
    params(("id" = Uuid, Path, description = "Permission id")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "No such permission", body = ErrorResponse)
    ),
    tag = "Permissions",
    security(("bearer_auth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .permissions
        .delete_permission(id, &ctx, principal.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
