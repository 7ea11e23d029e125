use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{TwoFactorCodeRequest, TwoFactorDisableRequest},
        ErrorResponse, MessageResponse,
    },
    middleware::AccountOwner,
    models::RequestContext,
    services::{ServiceError, TwoFactorSetup},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Start 2FA enrollment: secret, provisioning URI and backup codes
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/setup",
    responses(
        (status = 200, description = "Pending secret generated", body = TwoFactorSetup),
        (status = 400, description = "2FA already enabled", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
) -> Result<Json<TwoFactorSetup>, AppError> {
    let account = state.services.accounts.get(principal.account_id).await?;
    Ok(Json(state.services.two_factor.setup(&account).await?))
}

/// Confirm enrollment with the first code from the authenticator
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/verify",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "2FA enabled", body = MessageResponse),
        (status = 400, description = "No pending setup", body = ErrorResponse),
        (status = 401, description = "Wrong code", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<TwoFactorCodeRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let confirmed = state
        .services
        .two_factor
        .confirm_setup(principal.account_id, &req.code, &ctx)
        .await?;
    if !confirmed {
        return Err(ServiceError::InvalidCode.into());
    }
    Ok(Json(MessageResponse::new("Two-factor authentication enabled")))
}

/// Turn 2FA off; requires the password and a current code
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/disable",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 200, description = "2FA disabled", body = MessageResponse),
        (status = 400, description = "2FA not enabled", body = ErrorResponse),
        (status = 401, description = "Wrong password or code", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<TwoFactorDisableRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .services
        .two_factor
        .disable(
            principal.account_id,
            &Password::new(req.password),
            &req.code,
            &ctx,
        )
        .await?;
    Ok(Json(MessageResponse::new("Two-factor authentication disabled")))
}
