use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::TokenPair;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,

    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    #[schema(example = "alice")]
    pub username: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters"))]
    #[schema(example = "Alice Example")]
    pub display_name: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    #[schema(example = "Str0ng!Pass")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Str0ng!Pass")]
    pub password: String,

    /// Extends the session to the "remember me" lifetime
    #[serde(default)]
    pub remember_me: bool,

    #[schema(value_type = Option<Object>)]
    pub device_info: Option<serde_json::Value>,
}

/// Returned instead of tokens when the account has 2FA enabled.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorChallenge {
    #[schema(example = true)]
    pub requires_2fa: bool,
    pub challenge_token: String,
    #[schema(example = 300)]
    pub expires_in: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    Tokens(TokenPair),
    TwoFactor(TwoFactorChallenge),
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorLoginRequest {
    #[validate(length(min = 1, message = "Challenge token is required"))]
    pub challenge_token: String,

    #[validate(length(min = 6, max = 16, message = "Code must be 6-16 characters"))]
    #[schema(example = "123456")]
    pub code: String,

    #[serde(default)]
    pub remember_me: bool,

    #[schema(value_type = Option<Object>)]
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 1, max = 128, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorCodeRequest {
    #[validate(length(min = 6, max = 16, message = "Code must be 6-16 characters"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 6, max = 16, message = "Code must be 6-16 characters"))]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_defaults_remember_me_to_false() -> Result<(), anyhow::Error> {
        let req: LoginRequest = serde_json::from_value(serde_json::json!({
            "email": "alice@example.com",
            "password": "Str0ng!Pass"
        }))?;
        assert!(!req.remember_me);
        assert!(req.validate().is_ok());
        Ok(())
    }

    #[test]
    fn malformed_email_fails_validation() -> Result<(), anyhow::Error> {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "display_name": "Alice",
            "password": "Str0ng!Pass"
        }))?;
        assert!(req.validate().is_err());
        Ok(())
    }

    #[test]
    fn two_factor_challenge_serializes_flat() -> Result<(), anyhow::Error> {
        let body = serde_json::to_value(LoginResponse::TwoFactor(TwoFactorChallenge {
            requires_2fa: true,
            challenge_token: "t".to_string(),
            expires_in: 300,
        }))?;
        assert_eq!(body["requires_2fa"], true);
        assert_eq!(body["expires_in"], 300);
        Ok(())
    }
}
