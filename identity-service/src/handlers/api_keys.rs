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
    dtos::{admin::CreateApiKeyRequest, ErrorResponse},
    middleware::{AccountOwner, AuthUser},
    models::{ApiKeyInfo, RequestContext},
    services::CreatedApiKey,
    utils::ValidatedJson,
    AppState,
};

/// Create an API key; the plaintext is returned only here
#[utoipa::path(
    post,
    path = "/api/v1/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreatedApiKey),
        (status = 403, description = "Caller is a scoped API key", body = ErrorResponse),
        (status = 422, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .services
        .api_keys
        .create(
            principal.account_id,
            req.name,
            req.scopes,
            req.expires_at,
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List the caller's API keys
#[utoipa::path(
    get,
    path = "/api/v1/api-keys",
    responses(
        (status = 200, description = "Keys without secrets", body = [ApiKeyInfo])
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<ApiKeyInfo>>, AppError> {
    Ok(Json(state.services.api_keys.list(principal.account_id).await?))
}

/// Revoke one of the caller's API keys
#[utoipa::path(
    delete,
    path = "/api/v1/api-keys/{id}",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "No such key", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .api_keys
        .revoke(principal.account_id, id, &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
