//! Session lifecycle: creation, refresh, revocation and maintenance.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{JwtConfig, SessionConfig};
use crate::models::{AuditAction, AuditEvent, AuditStatus, RequestContext, Session};
use crate::repository::SessionRepository;
use crate::services::audit::AuditRecorder;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::jwt::{JwtService, TokenType};
use crate::utils::{random_token, sha256_hex};

/// Token response returned to client
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    jwt: JwtService,
    audit: AuditRecorder,
    default_ttl: Duration,
    extended_ttl: Duration,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        jwt: JwtService,
        audit: AuditRecorder,
        jwt_config: &JwtConfig,
        config: &SessionConfig,
    ) -> Self {
        Self {
            sessions,
            jwt,
            audit,
            default_ttl: Duration::days(jwt_config.refresh_token_expiry_days),
            extended_ttl: Duration::days(config.extended_expiry_days),
        }
    }

    /// Mints an access/refresh pair and persists the session behind it.
    /// `extended` selects the "remember me" lifetime.
    pub async fn create(
        &self,
        account_id: Uuid,
        ctx: &RequestContext,
        device_info: Option<serde_json::Value>,
        extended: bool,
    ) -> ServiceResult<TokenPair> {
        let now = Utc::now();
        let ttl = if extended {
            self.extended_ttl
        } else {
            self.default_ttl
        };
        let subject = account_id.to_string();

        let access_token = self.jwt.issue_access(&subject)?;
        let refresh_token = self.jwt.issue_refresh(&subject, ttl)?;

        let session = Session::new(
            account_id,
            random_token(32),
            sha256_hex(&refresh_token),
            ctx.ip_address.clone(),
            ctx.user_agent.clone(),
            device_info,
            ttl,
            now,
        );
        self.sessions.insert_session(&session).await?;

        tracing::info!(
            account_id = %account_id,
            session_id = %session.id,
            extended,
            "Session created"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// New access token for a live session. The refresh token is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<TokenPair> {
        self.refresh_at(refresh_token, Utc::now()).await
    }

    pub async fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> ServiceResult<TokenPair> {
        let subject = self.jwt.verify(refresh_token, TokenType::Refresh)?;

        let session = self
            .sessions
            .find_session_by_refresh_hash(&sha256_hex(refresh_token))
            .await?
            .filter(|s| s.is_usable_at(now))
            .ok_or(ServiceError::InvalidToken)?;

        if session.account_id.to_string() != subject {
            tracing::warn!(session_id = %session.id, "Refresh token subject does not match session owner");
            return Err(ServiceError::InvalidToken);
        }

        self.sessions.touch_session(session.id, now).await?;

        Ok(TokenPair {
            access_token: self.jwt.issue_access(&subject)?,
            refresh_token: refresh_token.to_string(),
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Idempotent: false when no active session holds the token.
    pub async fn revoke(&self, refresh_token: &str, ctx: &RequestContext) -> ServiceResult<bool> {
        let Some(session) = self
            .sessions
            .deactivate_session_by_refresh_hash(&sha256_hex(refresh_token))
            .await?
        else {
            return Ok(false);
        };

        self.audit
            .record(
                AuditEvent::new(AuditAction::Logout, AuditStatus::Success, ctx)
                    .account(session.account_id)
                    .resource("session", session.id),
            )
            .await;

        Ok(true)
    }

    pub async fn revoke_all(&self, account_id: Uuid, ctx: &RequestContext) -> ServiceResult<u64> {
        let count = self.sessions.deactivate_account_sessions(account_id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::LogoutAllSessions, AuditStatus::Success, ctx)
                    .account(account_id)
                    .details(json!({ "sessions_revoked": count })),
            )
            .await;

        Ok(count)
    }

    /// Administrative revocation of a single session.
    pub async fn revoke_by_id(&self, session_id: Uuid, ctx: &RequestContext) -> ServiceResult<()> {
        let session = self
            .sessions
            .find_session_by_id(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))?;

        let deactivated = self.sessions.deactivate_session(session_id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::SessionRevoked, AuditStatus::Success, ctx)
                    .account(session.account_id)
                    .resource("session", session_id)
                    .details(json!({ "was_active": deactivated })),
            )
            .await;

        Ok(())
    }

    pub async fn deactivate_expired(&self) -> ServiceResult<u64> {
        let count = self.sessions.deactivate_expired_sessions(Utc::now()).await?;
        if count > 0 {
            tracing::info!(count, "Deactivated expired sessions");
        }
        Ok(count)
    }

    /// Deletes inactive sessions that expired more than `retention` ago.
    pub async fn purge(&self, retention: Duration) -> ServiceResult<u64> {
        let count = self.sessions.purge_sessions(Utc::now() - retention).await?;
        if count > 0 {
            tracing::info!(count, "Purged old sessions");
        }
        Ok(count)
    }

    pub async fn list(&self, account_id: Uuid, active_only: bool) -> ServiceResult<Vec<Session>> {
        Ok(self
            .sessions
            .list_account_sessions(account_id, active_only)
            .await?)
    }
}
