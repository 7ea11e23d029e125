use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        auth::{
            ChangePasswordRequest, EffectivePermissionsResponse, LoginRequest, LoginResponse,
            LogoutRequest, RefreshRequest, RegisterRequest, TwoFactorChallenge,
            TwoFactorLoginRequest,
        },
        ErrorResponse, MessageResponse,
    },
    middleware::{AccountOwner, AuthUser},
    models::{AccountResponse, RequestContext},
    services::{LoginOutcome, Registration, TokenPair},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a new account
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 409, description = "Email or username taken", body = ErrorResponse),
        (status = 422, description = "Validation or password policy failure", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .services
        .auth
        .register(
            Registration {
                email: req.email,
                username: req.username,
                display_name: req.display_name,
                password: Password::new(req.password),
            },
            &ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(account.sanitized())))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens, or a 2FA challenge when enabled", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse),
        (status = 423, description = "Account locked", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let outcome = state
        .services
        .auth
        .login(
            &req.email,
            &Password::new(req.password),
            req.remember_me,
            req.device_info,
            &ctx,
        )
        .await?;

    let response = match outcome {
        LoginOutcome::Session(tokens) => LoginResponse::Tokens(tokens),
        LoginOutcome::TwoFactorRequired {
            challenge_token,
            expires_in,
        } => LoginResponse::TwoFactor(TwoFactorChallenge {
            requires_2fa: true,
            challenge_token,
            expires_in,
        }),
    };
    Ok(Json(response))
}

/// Complete a login with a TOTP or backup code
#[utoipa::path(
    post,
    path = "/api/v1/auth/login/2fa",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Session created", body = TokenPair),
        (status = 401, description = "Invalid challenge or code", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login_two_factor(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<TwoFactorLoginRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let tokens = state
        .services
        .auth
        .complete_two_factor(
            &req.challenge_token,
            &req.code,
            req.remember_me,
            req.device_info,
            &ctx,
        )
        .await?;
    Ok(Json(tokens))
}

/// Exchange a refresh token for a new access token
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenPair),
        (status = 401, description = "Invalid, expired or revoked token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    Ok(Json(state.services.auth.refresh(&req.refresh_token).await?))
}

/// End the session holding the refresh token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.services.auth.logout(&req.refresh_token, &ctx).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// End every session of the caller
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    responses(
        (status = 200, description = "All sessions ended", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout_all(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
) -> Result<Json<MessageResponse>, AppError> {
    let count = state
        .services
        .auth
        .logout_all(principal.account_id, &ctx)
        .await?;
    Ok(Json(MessageResponse::new(format!(
        "Logged out from {} session(s)",
        count
    ))))
}

/// Change the caller's password; ends every session
#[utoipa::path(
    post,
    path = "/api/v1/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Current password wrong", body = ErrorResponse),
        (status = 422, description = "New password rejected by policy", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    AccountOwner(principal): AccountOwner,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .services
        .auth
        .change_password(
            principal.account_id,
            &Password::new(req.current_password),
            &Password::new(req.new_password),
            &ctx,
        )
        .await?;
    Ok(Json(MessageResponse::new(
        "Password changed. Please log in again.",
    )))
}

/// Current account
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current account", body = AccountResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.services.accounts.get(principal.account_id).await?;
    Ok(Json(account.sanitized()))
}

/// Roles and effective permissions of the caller
#[utoipa::path(
    get,
    path = "/api/v1/auth/me/permissions",
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissionsResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<EffectivePermissionsResponse>, AppError> {
    let permissions = &state.services.permissions;
    let roles = permissions
        .account_roles(principal.account_id)
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();
    let names = permissions
        .effective_permission_names(principal.account_id)
        .await?
        .into_iter()
        .collect();

    Ok(Json(EffectivePermissionsResponse {
        roles,
        permissions: names,
    }))
}
