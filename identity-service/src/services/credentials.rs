//! Credential verification with failed-attempt lockout.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::config::LockoutConfig;
use crate::models::{Account, AuditAction, AuditEvent, AuditStatus, RequestContext};
use crate::repository::AccountRepository;
use crate::services::audit::AuditRecorder;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::metrics;
use crate::utils::{Argon2Hasher, Password};

#[derive(Clone)]
pub struct CredentialService {
    accounts: Arc<dyn AccountRepository>,
    hasher: Argon2Hasher,
    audit: AuditRecorder,
    max_attempts: i32,
    lockout: Duration,
}

impl CredentialService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        hasher: Argon2Hasher,
        audit: AuditRecorder,
        config: &LockoutConfig,
    ) -> Self {
        Self {
            accounts,
            hasher,
            audit,
            max_attempts: config.max_login_attempts,
            lockout: Duration::minutes(config.lockout_minutes),
        }
    }

    pub fn hasher(&self) -> &Argon2Hasher {
        &self.hasher
    }

    pub async fn authenticate(
        &self,
        email: &str,
        password: &Password,
        ctx: &RequestContext,
    ) -> ServiceResult<Account> {
        self.authenticate_at(email, password, ctx, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        email: &str,
        password: &Password,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> ServiceResult<Account> {
        let Some(mut account) = self.accounts.find_account_by_email(email).await? else {
            // Same hashing cost as a real mismatch.
            let hasher = self.hasher.clone();
            let password = password.clone();
            let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await;

            metrics::record_login_attempt("invalid_credentials");
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, AuditStatus::Failure, ctx)
                        .details(json!({ "reason": "user_not_found", "email": email })),
                )
                .await;
            return Err(ServiceError::InvalidCredentials);
        };

        if account.is_locked_at(now) {
            metrics::record_login_attempt("locked");
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, AuditStatus::Failure, ctx)
                        .account(account.id)
                        .details(json!({
                            "reason": "account_locked",
                            "locked_until": account.locked_until,
                        })),
                )
                .await;
            return Err(ServiceError::AccountLocked {
                until: account.locked_until,
            });
        }

        if !account.is_active {
            metrics::record_login_attempt("inactive");
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, AuditStatus::Failure, ctx)
                        .account(account.id)
                        .details(json!({ "reason": "account_inactive" })),
                )
                .await;
            return Err(ServiceError::AccountInactive);
        }

        if !self.verify_password(&account, password).await? {
            let state = self
                .accounts
                .record_failed_login(account.id, self.max_attempts, now + self.lockout)
                .await?;

            tracing::info!(
                account_id = %account.id,
                attempts = state.attempts,
                "Failed login attempt"
            );

            if state.locked_until.is_some_and(|until| until > now) {
                tracing::warn!(account_id = %account.id, "Account locked after repeated failures");
                self.audit
                    .record(
                        AuditEvent::new(AuditAction::AccountLocked, AuditStatus::Success, ctx)
                            .account(account.id)
                            .details(json!({
                                "attempts": state.attempts,
                                "locked_until": state.locked_until,
                            })),
                    )
                    .await;
            }

            metrics::record_login_attempt("invalid_credentials");
            self.audit
                .record(
                    AuditEvent::new(AuditAction::LoginFailed, AuditStatus::Failure, ctx)
                        .account(account.id)
                        .details(json!({
                            "reason": "invalid_password",
                            "attempts": state.attempts,
                        })),
                )
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        self.accounts.record_successful_login(account.id, now).await?;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.last_login = Some(now);

        self.audit
            .record(
                AuditEvent::new(AuditAction::LoginSuccess, AuditStatus::Success, ctx)
                    .account(account.id),
            )
            .await;

        Ok(account)
    }

    /// Checks `password` against the account's stored hash off the async
    /// executor. No lockout bookkeeping.
    pub async fn verify_password(&self, account: &Account, password: &Password) -> ServiceResult<bool> {
        let hasher = self.hasher.clone();
        let password = password.clone();
        let hash = account.password_hash.clone();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password check task failed: {}", e)))?
            .map_err(ServiceError::Internal)
    }

    pub async fn hash_password(&self, password: &Password) -> ServiceResult<String> {
        let hasher = self.hasher.clone();
        let password = password.clone();

        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hash task failed: {}", e)))?
            .map(|h| h.into_string())
            .map_err(ServiceError::Internal)
    }
}
