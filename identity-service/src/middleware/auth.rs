use service_core::axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::ApiKey;
use crate::services::jwt::parse_account_subject;
use crate::services::{Requirement, ServiceError, TokenType};
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Caller resolved from a bearer token or an API key.
#[derive(Debug, Clone)]
pub struct Principal {
    pub account_id: Uuid,
    /// Set when the caller authenticated with an API key.
    pub api_key: Option<ApiKey>,
}

impl Principal {
    /// API-key scopes further narrow what the owner's roles grant.
    fn key_allows(&self, requirement: Requirement) -> bool {
        match (&self.api_key, requirement) {
            (None, _) => true,
            (Some(key), Requirement::Permission(name)) => key.allows(name),
            (Some(key), Requirement::Role(_)) => key.scopes.is_none() || key.allows("*"),
        }
    }

    /// A session, or a key whose scopes cover everything the owner holds.
    pub fn has_full_authority(&self) -> bool {
        match &self.api_key {
            None => true,
            Some(key) => key.scopes.is_none() || key.allows("*"),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = if let Some(token) = bearer_token(req.headers()) {
        let subject = state.services.jwt.verify(token, TokenType::Access)?;
        Principal {
            account_id: parse_account_subject(&subject)?,
            api_key: None,
        }
    } else if let Some(key) = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        let key = state.services.api_keys.authenticate(key).await?;
        Principal {
            account_id: key.account_id,
            api_key: Some(key),
        }
    } else {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid Authorization header"
        )));
    };

    // Tokens outlive deactivation and deletion; the account row decides.
    let active = state
        .services
        .accounts
        .get(principal.account_id)
        .await
        .map(|account| account.is_active);
    match active {
        Ok(true) => {}
        Ok(false) => return Err(ServiceError::AccountInactive.into()),
        Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken.into()),
        Err(e) => return Err(e.into()),
    }

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// State for [`require_middleware`]: the app plus what the route demands.
#[derive(Clone)]
pub struct Guard {
    state: AppState,
    requirement: Requirement,
}

pub fn guard(state: &AppState, requirement: Requirement) -> Guard {
    Guard {
        state: state.clone(),
        requirement,
    }
}

/// Checks the route's requirement against current role assignments.
/// Runs after [`auth_middleware`].
pub async fn require_middleware(
    State(guard): State<Guard>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req.extensions().get::<Principal>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Principal missing from request extensions"
        ))
    })?;

    let granted = principal.key_allows(guard.requirement)
        && guard
            .state
            .services
            .permissions
            .satisfies(principal.account_id, guard.requirement)
            .await?;

    if !granted {
        tracing::warn!(
            account_id = %principal.account_id,
            requirement = %guard.requirement,
            via_api_key = principal.api_key.is_some(),
            path = %req.uri().path(),
            "Access denied"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Missing required {}",
            guard.requirement
        )));
    }

    Ok(next.run(req).await)
}

/// Extractor for the authenticated caller
pub struct AuthUser(pub Principal);

#[service_core::axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Principal>().ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
        })?;

        Ok(AuthUser(principal.clone()))
    }
}

/// Caller allowed to manage the account itself: credentials, 2FA, sessions
/// and keys. Scoped API keys are refused.
pub struct AccountOwner(pub Principal);

#[service_core::axum::async_trait]
impl<S> FromRequestParts<S> for AccountOwner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        if !principal.has_full_authority() {
            tracing::warn!(
                account_id = %principal.account_id,
                path = %parts.uri.path(),
                "Scoped API key refused for account management"
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Scoped API keys cannot manage the account"
            )));
        }
        Ok(AccountOwner(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn principal(scopes: Option<Vec<&str>>) -> Principal {
        Principal {
            account_id: Uuid::new_v4(),
            api_key: Some(ApiKey {
                id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                name: "ci".to_string(),
                key_hash: "h".to_string(),
                key_prefix: "imk_abcd".to_string(),
                scopes: scopes.map(|s| s.into_iter().map(String::from).collect()),
                expires_at: None,
                is_active: true,
                usage_count: 0,
                last_used_at: None,
                created_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn scoped_key_is_limited_to_its_scopes() {
        let p = principal(Some(vec!["users.read"]));
        assert!(p.key_allows(Requirement::Permission("users.read")));
        assert!(!p.key_allows(Requirement::Permission("users.delete")));
        assert!(!p.key_allows(Requirement::Role("Administrator")));
    }

    #[test]
    fn unscoped_key_defers_to_roles() {
        let p = principal(None);
        assert!(p.key_allows(Requirement::Permission("system.admin")));
        assert!(p.key_allows(Requirement::Role("Administrator")));
    }

    #[test]
    fn only_sessions_and_unrestricted_keys_have_full_authority() {
        assert!(principal(None).has_full_authority());
        assert!(principal(Some(vec!["*"])).has_full_authority());
        assert!(!principal(Some(vec!["users.read"])).has_full_authority());
        assert!(!principal(Some(vec!["users.*", "roles.*"])).has_full_authority());

        let session = Principal {
            account_id: Uuid::new_v4(),
            api_key: None,
        };
        assert!(session.has_full_authority());
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
