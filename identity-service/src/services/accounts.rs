//! Account administration and first-superuser bootstrap.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Account, AuditAction, AuditEvent, AuditStatus, RequestContext};
use crate::repository::{AccountRepository, StoreError};
use crate::services::audit::AuditRecorder;
use crate::services::credentials::CredentialService;
use crate::services::error::{ServiceError, ServiceResult};
use crate::services::permissions::{PermissionService, ADMINISTRATOR_ROLE};
use crate::services::sessions::SessionService;
use crate::utils::Password;

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    credentials: CredentialService,
    sessions: SessionService,
    permissions: PermissionService,
    audit: AuditRecorder,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        credentials: CredentialService,
        sessions: SessionService,
        permissions: PermissionService,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            accounts,
            credentials,
            sessions,
            permissions,
            audit,
        }
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Account> {
        self.accounts
            .find_account_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    /// Toggles the active flag. Deactivation also ends every session.
    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        ctx: &RequestContext,
        actor: Uuid,
    ) -> ServiceResult<Account> {
        let account = self.get(id).await?;
        if !active && account.is_superuser {
            return Err(ServiceError::Forbidden(
                "Superuser accounts cannot be deactivated".to_string(),
            ));
        }

        if !self.accounts.set_account_active(id, active).await? {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }

        let mut sessions_revoked = 0;
        if !active {
            sessions_revoked = self.sessions.revoke_all(id, ctx).await?;
        }

        let action = if active {
            AuditAction::AccountActivated
        } else {
            AuditAction::AccountDeactivated
        };
        self.audit
            .record(
                AuditEvent::new(action, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("account", id)
                    .details(json!({ "sessions_revoked": sessions_revoked })),
            )
            .await;

        tracing::info!(account_id = %id, active, "Account activation changed");
        self.get(id).await
    }

    /// Removes the account with its sessions, keys and role links. Audit
    /// history keeps the dangling id.
    pub async fn delete(&self, id: Uuid, ctx: &RequestContext, actor: Uuid) -> ServiceResult<()> {
        let account = self.get(id).await?;
        if account.is_superuser {
            return Err(ServiceError::Forbidden(
                "Superuser accounts cannot be deleted".to_string(),
            ));
        }

        if !self.accounts.delete_account(id).await? {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::UserDeleted, AuditStatus::Success, ctx)
                    .account(actor)
                    .resource("account", id)
                    .details(json!({ "email": account.email })),
            )
            .await;

        tracing::info!(account_id = %id, "Account deleted");
        Ok(())
    }

    /// Creates the configured superuser if absent and makes sure it holds
    /// the Administrator role. Run after the default roles are seeded.
    pub async fn ensure_superuser(&self, email: &str, password: &Password) -> ServiceResult<Account> {
        let account = match self.accounts.find_account_by_email(email).await? {
            Some(existing) => existing,
            None => {
                let hash = self.credentials.hash_password(password).await?;
                let mut account =
                    Account::new(email.to_string(), None, "Administrator".to_string(), hash);
                account.is_superuser = true;
                account.is_verified = true;

                match self.accounts.insert_account(&account).await {
                    Ok(()) => {
                        tracing::info!(account_id = %account.id, "First superuser created");
                        account
                    }
                    // Another instance created it first.
                    Err(StoreError::Duplicate(_)) => self
                        .accounts
                        .find_account_by_email(email)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let admin = self.permissions.find_role_by_name(ADMINISTRATOR_ROLE).await?;
        self.permissions
            .assign_role(account.id, admin.id, &RequestContext::default(), account.id)
            .await?;

        Ok(account)
    }
}
