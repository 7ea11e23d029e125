//! Session model - one row per authenticated login.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Session entity.
///
/// The refresh token itself is never stored; `refresh_token_hash` holds its
/// SHA-256 digest.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub session_token: String,
    pub refresh_token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: Uuid,
        session_token: String,
        refresh_token_hash: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
        device_info: Option<serde_json::Value>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            session_token,
            refresh_token_hash,
            ip_address,
            user_agent,
            device_info,
            is_active: true,
            expires_at: now + ttl,
            last_activity: now,
            created_at: now,
        }
    }

    /// Active and not past its absolute expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Session info for API responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    pub id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
            device_info: s.device_info,
            is_active: s.is_active,
            created_at: s.created_at,
            last_activity: s.last_activity,
            expires_at: s.expires_at,
        }
    }
}
