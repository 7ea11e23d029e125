//! Login flows that span several components: registration, password and
//! second-factor login, token refresh, logout and password change.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Account, AuditAction, AuditEvent, AuditStatus, RequestContext};
use crate::repository::{AccountRepository, StoreError};
use crate::services::audit::AuditRecorder;
use crate::services::credentials::CredentialService;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::jwt::{parse_two_factor_subject, JwtService, TokenType};
use crate::services::metrics;
use crate::services::policy::PasswordPolicy;
use crate::services::sessions::{SessionService, TokenPair};
use crate::services::two_factor::TwoFactorService;
use crate::utils::Password;

/// New account as submitted by the client.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: Option<String>,
    pub display_name: String,
    pub password: Password,
}

/// Result of a password login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Session(TokenPair),
    /// The account has 2FA on; the challenge token must be exchanged
    /// together with a code for a real session.
    TwoFactorRequired {
        challenge_token: String,
        expires_in: i64,
    },
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    credentials: CredentialService,
    sessions: SessionService,
    two_factor: TwoFactorService,
    jwt: JwtService,
    policy: PasswordPolicy,
    audit: AuditRecorder,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        credentials: CredentialService,
        sessions: SessionService,
        two_factor: TwoFactorService,
        jwt: JwtService,
        policy: PasswordPolicy,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            accounts,
            credentials,
            sessions,
            two_factor,
            jwt,
            policy,
            audit,
        }
    }

    pub async fn register(&self, registration: Registration, ctx: &RequestContext) -> ServiceResult<Account> {
        let violations = self.policy.violations(registration.password.as_str());
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        if self
            .accounts
            .find_account_by_email(&registration.email)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }
        if let Some(username) = &registration.username {
            if self.accounts.find_account_by_username(username).await?.is_some() {
                return Err(ServiceError::Conflict("Username already taken".to_string()));
            }
        }

        let hash = self.credentials.hash_password(&registration.password).await?;
        let account = Account::new(
            registration.email,
            registration.username,
            registration.display_name,
            hash,
        );

        // A concurrent registration can still win the unique index.
        self.accounts
            .insert_account(&account)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(field) if field.contains("username") => {
                    ServiceError::Conflict("Username already taken".to_string())
                }
                StoreError::Duplicate(_) => {
                    ServiceError::Conflict("Email already registered".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(account_id = %account.id, "Account registered");
        self.audit
            .record(
                AuditEvent::new(AuditAction::UserRegistered, AuditStatus::Success, ctx)
                    .account(account.id)
                    .details(json!({ "email": account.email })),
            )
            .await;

        Ok(account)
    }

    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        remember_me: bool,
        device_info: Option<serde_json::Value>,
        ctx: &RequestContext,
    ) -> ServiceResult<LoginOutcome> {
        let account = self.credentials.authenticate(email, password, ctx).await?;

        if account.is_2fa_enabled {
            metrics::record_login_attempt("two_factor_required");
            tracing::info!(account_id = %account.id, "Second factor required");
            return Ok(LoginOutcome::TwoFactorRequired {
                challenge_token: self.jwt.issue_two_factor_challenge(account.id)?,
                expires_in: self.jwt.two_factor_expiry_seconds(),
            });
        }

        metrics::record_login_attempt("success");
        let tokens = self
            .sessions
            .create(account.id, ctx, device_info, remember_me)
            .await?;
        Ok(LoginOutcome::Session(tokens))
    }

    /// Exchanges a challenge token plus a TOTP or backup code for a session.
    pub async fn complete_two_factor(
        &self,
        challenge_token: &str,
        code: &str,
        remember_me: bool,
        device_info: Option<serde_json::Value>,
        ctx: &RequestContext,
    ) -> ServiceResult<TokenPair> {
        let subject = self.jwt.verify(challenge_token, TokenType::Access)?;
        let account_id = parse_two_factor_subject(&subject).ok_or(ServiceError::InvalidToken)?;

        let account = self
            .accounts
            .find_account_by_id(account_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !account.is_active {
            return Err(ServiceError::AccountInactive);
        }
        if account.is_locked_at(Utc::now()) {
            return Err(ServiceError::AccountLocked {
                until: account.locked_until,
            });
        }

        if !self.two_factor.verify_code(&account, code, ctx).await? {
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, AuditStatus::Failure, ctx)
                        .account(account.id)
                        .details(json!({ "reason": "invalid_2fa_code" })),
                )
                .await;
            return Err(ServiceError::InvalidCode);
        }

        metrics::record_login_attempt("success");
        self.sessions
            .create(account.id, ctx, device_info, remember_me)
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<TokenPair> {
        self.sessions.refresh(refresh_token).await
    }

    pub async fn logout(&self, refresh_token: &str, ctx: &RequestContext) -> ServiceResult<bool> {
        self.sessions.revoke(refresh_token, ctx).await
    }

    pub async fn logout_all(&self, account_id: Uuid, ctx: &RequestContext) -> ServiceResult<u64> {
        self.sessions.revoke_all(account_id, ctx).await
    }

    /// Replaces the password and ends every session of the account.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current: &Password,
        new: &Password,
        ctx: &RequestContext,
    ) -> ServiceResult<()> {
        let account = self
            .accounts
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        if !self.credentials.verify_password(&account, current).await? {
            self.audit
                .record(
                    AuditEvent::new(AuditAction::PasswordChanged, AuditStatus::Failure, ctx)
                        .account(account.id)
                        .details(json!({ "reason": "invalid_current_password" })),
                )
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        let violations = self.policy.violations(new.as_str());
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let hash = self.credentials.hash_password(new).await?;
        self.accounts
            .update_password(account.id, &hash, Utc::now())
            .await?;
        let revoked = self.sessions.revoke_all(account.id, ctx).await?;

        tracing::info!(account_id = %account.id, sessions_revoked = revoked, "Password changed");
        self.audit
            .record(
                AuditEvent::new(AuditAction::PasswordChanged, AuditStatus::Success, ctx)
                    .account(account.id)
                    .details(json!({ "sessions_revoked": revoked })),
            )
            .await;

        Ok(())
    }
}
