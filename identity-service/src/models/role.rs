//! Role and permission models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Permission entity. Named canonically `resource.action`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(resource: &str, action: &str, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Self::canonical_name(resource, action),
            resource: resource.to_string(),
            action: action.to_string(),
            description,
            created_at: Utc::now(),
        }
    }

    pub fn canonical_name(resource: &str, action: &str) -> String {
        format!("{}.{}", resource, action)
    }
}

/// Role entity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// System roles cannot be renamed, edited or deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String, description: Option<String>, is_system: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            is_system,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Role together with its permission set, for API responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_name_is_resource_dot_action() {
        let p = Permission::new("users", "create", None);
        assert_eq!(p.name, "users.create");
        assert_eq!(p.resource, "users");
        assert_eq!(p.action, "create");
    }
}
