use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;

use crate::repository::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked")]
    AccountLocked { until: Option<DateTime<Utc>> },

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Two-factor setup has not been initiated")]
    TwoFactorNotInitiated,

    #[error("Two-factor authentication is not enabled")]
    TwoFactorNotEnabled,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => {
                ServiceError::Conflict(format!("Duplicate value for {}", field))
            }
            StoreError::Timeout => ServiceError::Unavailable("storage timed out".to_string()),
            StoreError::Unavailable(e) => ServiceError::Unavailable(format!("{:#}", e)),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::AccountLocked { until } => AppError::Locked(match until {
                Some(until) => format!("Account is locked until {}", until.to_rfc3339()),
                None => "Account is locked".to_string(),
            }),
            ServiceError::AccountInactive => {
                AppError::Forbidden(anyhow::anyhow!("Account is inactive"))
            }
            ServiceError::InvalidToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            e @ (ServiceError::TwoFactorAlreadyEnabled
            | ServiceError::TwoFactorNotInitiated
            | ServiceError::TwoFactorNotEnabled) => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            ServiceError::InvalidCode => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid verification code"))
            }
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            ServiceError::Validation(errors) => {
                AppError::Unprocessable("Validation failed".to_string(), errors)
            }
            ServiceError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn taxonomy_maps_to_stable_statuses() {
        let cases = [
            (ServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (
                ServiceError::AccountLocked { until: None },
                StatusCode::LOCKED,
            ),
            (ServiceError::AccountInactive, StatusCode::FORBIDDEN),
            (ServiceError::InvalidToken, StatusCode::UNAUTHORIZED),
            (ServiceError::TwoFactorNotEnabled, StatusCode::BAD_REQUEST),
            (
                ServiceError::Conflict("role in use".into()),
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::Validation(vec!["too short".into()]),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Unavailable("db".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn store_duplicate_becomes_conflict() {
        let err = ServiceError::from(StoreError::Duplicate("email".into()));
        assert!(matches!(err, ServiceError::Conflict(_)));
        let err = ServiceError::from(StoreError::Timeout);
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }
}
