//! Storage interface consumed by the identity services.
//!
//! Split by aggregate so each service receives only the repositories it
//! touches. [`PgStore`] is the production implementation; [`MemoryStore`]
//! backs tests and local runs without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, ApiKey, AuditEvent, AuditQuery, Permission, Role, Session};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for {0}")]
    Duplicate(String),

    #[error("storage call timed out")]
    Timeout,

    #[error("storage unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counter state after an atomic failed-login increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Option<Account>>;

    /// Increments the counter and, once it reaches `max_attempts`, sets
    /// `locked_until` in the same atomic step.
    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin>;

    /// Resets the counter, clears lockout and stamps last-login.
    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn update_password(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns false when the account does not exist.
    async fn set_account_active(&self, id: Uuid, active: bool) -> StoreResult<bool>;

    /// Stores a pending secret and fresh backup codes without enabling 2FA.
    async fn store_pending_two_factor(
        &self,
        id: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> StoreResult<()>;

    /// Flips 2FA on; false when no pending secret exists.
    async fn enable_two_factor(&self, id: Uuid) -> StoreResult<bool>;

    async fn clear_two_factor(&self, id: Uuid) -> StoreResult<()>;

    /// Removes `code` if still present and returns how many codes remain.
    /// `None` means the code was not (or no longer) in the set.
    async fn consume_backup_code(&self, id: Uuid, code: &str) -> StoreResult<Option<usize>>;

    /// Deletes the account with its sessions, keys and role links.
    async fn delete_account(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait RbacRepository: Send + Sync {
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;

    async fn find_permission_by_id(&self, id: Uuid) -> StoreResult<Option<Permission>>;

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;

    async fn delete_permission(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_role(&self, role: &Role) -> StoreResult<()>;

    async fn update_role(&self, role: &Role) -> StoreResult<()>;

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    async fn delete_role(&self, id: Uuid) -> StoreResult<bool>;

    /// Replaces the role's permission set.
    async fn set_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid])
    -> StoreResult<()>;

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>>;

    async fn count_role_members(&self, role_id: Uuid) -> StoreResult<i64>;

    /// Returns true when the link was newly created.
    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool>;

    /// Returns true when a link was removed.
    async fn remove_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool>;

    async fn account_roles(&self, account_id: Uuid) -> StoreResult<Vec<Role>>;

    /// Distinct union of permissions across all of the account's roles.
    async fn account_permissions(&self, account_id: Uuid) -> StoreResult<Vec<Permission>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    async fn find_session_by_id(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn find_session_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>>;

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Deactivates the active session holding `hash` and returns it.
    async fn deactivate_session_by_refresh_hash(&self, hash: &str)
    -> StoreResult<Option<Session>>;

    /// Returns true when an active session was deactivated.
    async fn deactivate_session(&self, id: Uuid) -> StoreResult<bool>;

    async fn deactivate_account_sessions(&self, account_id: Uuid) -> StoreResult<u64>;

    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Hard-deletes inactive sessions that expired before `before`.
    async fn purge_sessions(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    async fn list_account_sessions(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Session>>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()>;

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKey>>;

    async fn record_api_key_use(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Deactivates a key owned by `account_id`; false if no such key.
    async fn deactivate_api_key(&self, account_id: Uuid, id: Uuid) -> StoreResult<bool>;

    async fn list_api_keys(&self, account_id: Uuid) -> StoreResult<Vec<ApiKey>>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()>;

    async fn list_audit_events(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>>;
}

/// Everything the service needs from one backing store.
pub trait IdentityStore:
    AccountRepository + RbacRepository + SessionRepository + ApiKeyRepository + AuditRepository
{
}

impl<T> IdentityStore for T where
    T: AccountRepository + RbacRepository + SessionRepository + ApiKeyRepository + AuditRepository
{
}
