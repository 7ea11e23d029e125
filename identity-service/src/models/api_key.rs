//! API key model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// API key entity. Only the SHA-256 digest of the key is persisted.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub key_hash: String,
    /// First characters of the plaintext, for recognising a key in listings.
    pub key_prefix: String,
    pub scopes: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }

    /// Whether the key's scopes cover `permission`. No scopes means the key
    /// carries the owner's full permission set.
    pub fn allows(&self, permission: &str) -> bool {
        match &self.scopes {
            None => true,
            Some(scopes) => scopes.iter().any(|scope| scope_matches(scope, permission)),
        }
    }
}

fn scope_matches(scope: &str, permission: &str) -> bool {
    if scope == "*" {
        return true;
    }
    match scope.strip_suffix('*') {
        Some(prefix) => permission.starts_with(prefix),
        None => scope == permission,
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub scopes: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyInfo {
    fn from(k: ApiKey) -> Self {
        Self {
            id: k.id,
            name: k.name,
            key_prefix: k.key_prefix,
            scopes: k.scopes,
            expires_at: k.expires_at,
            is_active: k.is_active,
            usage_count: k.usage_count,
            last_used_at: k.last_used_at,
            created_at: k.created_at,
        }
    }
}
