//! Audit event model - append-only security trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed vocabulary of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "login_success")]
    LoginSuccess,
    #[serde(rename = "login_failed")]
    LoginFailed,
    #[serde(rename = "account_locked")]
    AccountLocked,
    #[serde(rename = "password_changed")]
    PasswordChanged,
    #[serde(rename = "2fa_enabled")]
    TwoFactorEnabled,
    #[serde(rename = "2fa_disabled")]
    TwoFactorDisabled,
    #[serde(rename = "2fa_backup_code_used")]
    TwoFactorBackupCodeUsed,
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "logout_all_sessions")]
    LogoutAllSessions,
    #[serde(rename = "user_registered")]
    UserRegistered,
    #[serde(rename = "user_deleted")]
    UserDeleted,
    #[serde(rename = "account_activated")]
    AccountActivated,
    #[serde(rename = "account_deactivated")]
    AccountDeactivated,
    #[serde(rename = "session_revoked")]
    SessionRevoked,
    #[serde(rename = "role_created")]
    RoleCreated,
    #[serde(rename = "role_updated")]
    RoleUpdated,
    #[serde(rename = "role_deleted")]
    RoleDeleted,
    #[serde(rename = "role_assigned")]
    RoleAssigned,
    #[serde(rename = "role_removed")]
    RoleRemoved,
    #[serde(rename = "permission_created")]
    PermissionCreated,
    #[serde(rename = "permission_deleted")]
    PermissionDeleted,
    #[serde(rename = "api_key_created")]
    ApiKeyCreated,
    #[serde(rename = "api_key_revoked")]
    ApiKeyRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "login_success",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::AccountLocked => "account_locked",
            AuditAction::PasswordChanged => "password_changed",
            AuditAction::TwoFactorEnabled => "2fa_enabled",
            AuditAction::TwoFactorDisabled => "2fa_disabled",
            AuditAction::TwoFactorBackupCodeUsed => "2fa_backup_code_used",
            AuditAction::Logout => "logout",
            AuditAction::LogoutAllSessions => "logout_all_sessions",
            AuditAction::UserRegistered => "user_registered",
            AuditAction::UserDeleted => "user_deleted",
            AuditAction::AccountActivated => "account_activated",
            AuditAction::AccountDeactivated => "account_deactivated",
            AuditAction::SessionRevoked => "session_revoked",
            AuditAction::RoleCreated => "role_created",
            AuditAction::RoleUpdated => "role_updated",
            AuditAction::RoleDeleted => "role_deleted",
            AuditAction::RoleAssigned => "role_assigned",
            AuditAction::RoleRemoved => "role_removed",
            AuditAction::PermissionCreated => "permission_created",
            AuditAction::PermissionDeleted => "permission_deleted",
            AuditAction::ApiKeyCreated => "api_key_created",
            AuditAction::ApiKeyRevoked => "api_key_revoked",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Error => "error",
        }
    }
}

/// Request metadata copied onto every audit event.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
            endpoint: None,
            method: None,
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, status: AuditStatus, ctx: &RequestContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: None,
            action: action.as_str().to_string(),
            resource_type: None,
            resource_id: None,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            endpoint: ctx.endpoint.clone(),
            method: ctx.method.clone(),
            details: None,
            status: status.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Filters for audit reporting; newest events first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub account_id: Option<Uuid>,
    pub action: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.account_id.is_none_or(|id| event.account_id == Some(id))
            && self.action.as_deref().is_none_or(|a| event.action == a)
            && self.status.as_deref().is_none_or(|s| event.status == s)
            && self.since.is_none_or(|since| event.created_at >= since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_factor_actions_use_short_tags() -> Result<(), anyhow::Error> {
        assert_eq!(AuditAction::TwoFactorEnabled.as_str(), "2fa_enabled");
        assert_eq!(
            serde_json::to_value(AuditAction::TwoFactorBackupCodeUsed)?,
            serde_json::json!("2fa_backup_code_used")
        );
        Ok(())
    }

    #[test]
    fn query_filters_by_action_and_account() {
        let account = Uuid::new_v4();
        let event = AuditEvent::new(
            AuditAction::LoginFailed,
            AuditStatus::Failure,
            &RequestContext::default(),
        )
        .account(account);

        let q = AuditQuery {
            account_id: Some(account),
            action: Some("login_failed".to_string()),
            ..Default::default()
        };
        assert!(q.matches(&event));

        let other = AuditQuery {
            action: Some("logout".to_string()),
            ..Default::default()
        };
        assert!(!other.matches(&event));
        assert_eq!(other.effective_limit(), 100);
    }
}
