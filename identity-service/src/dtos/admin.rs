use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::AuditQuery;

/// Lowercase letters, digits and underscores; used for permission parts.
fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("identifier")
            .with_message("Use lowercase letters, digits and underscores".into()))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    #[schema(example = "ci-pipeline")]
    pub name: String,

    /// Permission names the key is limited to; `*` and `prefix*` allowed
    #[schema(example = json!(["users.read", "roles.*"]))]
    pub scopes: Option<Vec<String>>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    #[schema(example = "Auditor")]
    pub name: String,

    #[validate(length(max = 255))]
    pub description: Option<String>,

    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 255))]
    pub description: Option<String>,

    /// Replaces the permission set when present
    pub permission_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionRequest {
    #[validate(length(max = 50), custom(function = "validate_identifier"))]
    #[schema(example = "reports")]
    pub resource: String,

    #[validate(length(max = 50), custom(function = "validate_identifier"))]
    #[schema(example = "read")]
    pub action: String,

    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleAssignmentResponse {
    pub account_id: Uuid,
    pub role_id: Uuid,
    /// False when the requested state already held
    pub changed: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditLogParams {
    pub account_id: Option<Uuid>,
    #[param(example = "login_failed")]
    pub action: Option<String>,
    #[param(example = "failure")]
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[param(example = 100)]
    pub limit: Option<i64>,
}

impl From<AuditLogParams> for AuditQuery {
    fn from(p: AuditLogParams) -> Self {
        AuditQuery {
            account_id: p.account_id,
            action: p.action,
            status: p.status,
            since: p.since,
            limit: p.limit,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SessionListParams {
    /// Include revoked and expired sessions
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct CleanupParams {
    /// Inactive sessions that expired more than this many days ago are deleted
    #[validate(range(min = 0, max = 3650))]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub deactivated: u64,
    pub purged: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedSessionsResponse {
    pub sessions_revoked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_parts_must_be_identifiers() -> Result<(), anyhow::Error> {
        let ok: CreatePermissionRequest = serde_json::from_value(serde_json::json!({
            "resource": "reports",
            "action": "read"
        }))?;
        assert!(ok.validate().is_ok());

        let bad: CreatePermissionRequest = serde_json::from_value(serde_json::json!({
            "resource": "Reports.All",
            "action": "read"
        }))?;
        assert!(bad.validate().is_err());
        Ok(())
    }
}
