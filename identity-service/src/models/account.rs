//! Account model - the authenticating identity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Account entity.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub display_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub is_2fa_enabled: bool,
    pub totp_secret: Option<String>,
    pub backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where an account sits in the two-factor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorState {
    Disabled,
    PendingSetup,
    Enabled,
}

impl Account {
    pub fn new(
        email: String,
        username: Option<String>,
        display_name: String,
        password_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            username,
            display_name,
            password_hash,
            is_active: true,
            is_verified: false,
            is_superuser: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            password_changed_at: None,
            is_2fa_enabled: false,
            totp_secret: None,
            backup_codes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A lockout timestamp in the past counts as unlocked.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn two_factor_state(&self) -> TwoFactorState {
        match (self.is_2fa_enabled, self.totp_secret.is_some()) {
            (true, _) => TwoFactorState::Enabled,
            (false, true) => TwoFactorState::PendingSetup,
            (false, false) => TwoFactorState::Disabled,
        }
    }

    pub fn sanitized(&self) -> AccountResponse {
        AccountResponse::from(self)
    }
}

/// Account without secrets, safe to return to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub display_name: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub is_2fa_enabled: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            email: a.email.clone(),
            username: a.username.clone(),
            display_name: a.display_name.clone(),
            is_active: a.is_active,
            is_verified: a.is_verified,
            is_superuser: a.is_superuser,
            is_2fa_enabled: a.is_2fa_enabled,
            last_login: a.last_login,
            created_at: a.created_at,
        }
    }
}
