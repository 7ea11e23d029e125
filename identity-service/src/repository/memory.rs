use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AccountRepository, ApiKeyRepository, AuditRepository, FailedLogin, RbacRepository,
    SessionRepository, StoreError, StoreResult,
};
use crate::models::{Account, ApiKey, AuditEvent, AuditQuery, Permission, Role, Session};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    permissions: HashMap<Uuid, Permission>,
    roles: HashMap<Uuid, Role>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    account_roles: HashSet<(Uuid, Uuid)>,
    sessions: HashMap<Uuid, Session>,
    api_keys: HashMap<Uuid, ApiKey>,
    audit: Vec<AuditEvent>,
}

/// In-process store with the same uniqueness and atomicity guarantees as
/// the Postgres schema. Every operation runs under one lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_audit_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent audit inserts fail, to exercise degraded audit paths.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }
}

fn duplicate(field: &str) -> StoreError {
    StoreError::Duplicate(field.to_string())
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.accounts.values().any(|a| a.email == account.email) {
            return Err(duplicate("email"));
        }
        if let Some(username) = &account.username {
            if inner
                .accounts
                .values()
                .any(|a| a.username.as_ref() == Some(username))
            {
                return Err(duplicate("username"));
            }
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner
            .accounts
            .values()
            .find(|a| a.username.as_deref() == Some(username))
            .cloned())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Unavailable(anyhow::anyhow!("account {} vanished", id)))?;

        account.failed_login_attempts += 1;
        if account.failed_login_attempts >= max_attempts {
            account.locked_until = Some(lock_until);
        }
        account.updated_at = Utc::now();

        Ok(FailedLogin {
            attempts: account.failed_login_attempts,
            locked_until: account.locked_until,
        })
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(&id) {
            account.failed_login_attempts = 0;
            account.locked_until = None;
            account.last_login = Some(at);
            account.updated_at = at;
        }
        Ok(())
    }

    async fn update_password(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(&id) {
            account.password_hash = hash.to_string();
            account.password_changed_at = Some(at);
            account.updated_at = at;
        }
        Ok(())
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.accounts.get_mut(&id) {
            Some(account) => {
                account.is_active = active;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn store_pending_two_factor(
        &self,
        id: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(&id) {
            account.totp_secret = Some(secret.to_string());
            account.backup_codes = backup_codes.to_vec();
            account.is_2fa_enabled = false;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn enable_two_factor(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.accounts.get_mut(&id) {
            Some(account) if account.totp_secret.is_some() => {
                account.is_2fa_enabled = true;
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_two_factor(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(&id) {
            account.is_2fa_enabled = false;
            account.totp_secret = None;
            account.backup_codes.clear();
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn consume_backup_code(&self, id: Uuid, code: &str) -> StoreResult<Option<usize>> {
        let mut inner = self.inner.write().await;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(None);
        };
        match account.backup_codes.iter().position(|c| c == code) {
            Some(index) => {
                account.backup_codes.remove(index);
                Ok(Some(account.backup_codes.len()))
            }
            None => Ok(None),
        }
    }

    async fn delete_account(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.accounts.remove(&id).is_none() {
            return Ok(false);
        }
        inner.sessions.retain(|_, s| s.account_id != id);
        inner.api_keys.retain(|_, k| k.account_id != id);
        inner.account_roles.retain(|(account_id, _)| *account_id != id);
        Ok(true)
    }
}

#[async_trait]
impl RbacRepository for MemoryStore {
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.permissions.values().any(|p| p.name == permission.name) {
            return Err(duplicate("permission name"));
        }
        inner.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn find_permission_by_id(&self, id: Uuid) -> StoreResult<Option<Permission>> {
        Ok(self.inner.read().await.permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let inner = self.inner.read().await;
        Ok(inner.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read().await;
        let mut permissions: Vec<Permission> = inner.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.permissions.remove(&id).is_none() {
            return Ok(false);
        }
        inner.role_permissions.retain(|(_, p)| *p != id);
        Ok(true)
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.roles.values().any(|r| r.name == role.name) {
            return Err(duplicate("role name"));
        }
        inner.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .roles
            .values()
            .any(|r| r.name == role.name && r.id != role.id)
        {
            return Err(duplicate("role name"));
        }
        inner.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>> {
        Ok(self.inner.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let inner = self.inner.read().await;
        Ok(inner.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read().await;
        let mut roles: Vec<Role> = inner.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.roles.remove(&id).is_none() {
            return Ok(false);
        }
        inner.role_permissions.retain(|(r, _)| *r != id);
        Ok(true)
    }

    async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.role_permissions.retain(|(r, _)| *r != role_id);
        for permission_id in permission_ids {
            inner.role_permissions.insert((role_id, *permission_id));
        }
        Ok(())
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read().await;
        let mut permissions: Vec<Permission> = inner
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| inner.permissions.get(p).cloned())
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn count_role_members(&self, role_id: Uuid) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .account_roles
            .iter()
            .filter(|(_, r)| *r == role_id)
            .count() as i64)
    }

    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .account_roles
            .insert((account_id, role_id)))
    }

    async fn remove_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .account_roles
            .remove(&(account_id, role_id)))
    }

    async fn account_roles(&self, account_id: Uuid) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read().await;
        let mut roles: Vec<Role> = inner
            .account_roles
            .iter()
            .filter(|(a, _)| *a == account_id)
            .filter_map(|(_, r)| inner.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn account_permissions(&self, account_id: Uuid) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read().await;
        let role_ids: HashSet<Uuid> = inner
            .account_roles
            .iter()
            .filter(|(a, _)| *a == account_id)
            .map(|(_, r)| *r)
            .collect();
        let permission_ids: HashSet<Uuid> = inner
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .map(|(_, p)| *p)
            .collect();
        let mut permissions: Vec<Permission> = permission_ids
            .iter()
            .filter_map(|p| inner.permissions.get(p).cloned())
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .sessions
            .values()
            .any(|s| s.session_token == session.session_token)
        {
            return Err(duplicate("session token"));
        }
        if inner
            .sessions
            .values()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(duplicate("refresh token"));
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn find_session_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == hash)
            .cloned())
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(session) = self.inner.write().await.sessions.get_mut(&id) {
            session.last_activity = at;
        }
        Ok(())
    }

    async fn deactivate_session_by_refresh_hash(
        &self,
        hash: &str,
    ) -> StoreResult<Option<Session>> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == hash && s.is_active);
        Ok(session.map(|s| {
            s.is_active = false;
            s.clone()
        }))
    }

    async fn deactivate_session(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_account_sessions(&self, account_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for session in inner
            .sessions
            .values_mut()
            .filter(|s| s.account_id == account_id && s.is_active)
        {
            session.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for session in inner
            .sessions
            .values_mut()
            .filter(|s| s.is_active && s.expires_at <= now)
        {
            session.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn purge_sessions(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before_len = inner.sessions.len();
        inner
            .sessions
            .retain(|_, s| s.is_active || s.expires_at >= before);
        Ok((before_len - inner.sessions.len()) as u64)
    }

    async fn list_account_sessions(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && (!active_only || s.is_active))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryStore {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(duplicate("key hash"));
        }
        inner.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKey>> {
        let inner = self.inner.read().await;
        Ok(inner.api_keys.values().find(|k| k.key_hash == hash).cloned())
    }

    async fn record_api_key_use(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(key) = self.inner.write().await.api_keys.get_mut(&id) {
            key.usage_count += 1;
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn deactivate_api_key(&self, account_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.api_keys.get_mut(&id) {
            Some(key) if key.account_id == account_id && key.is_active => {
                key.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_api_keys(&self, account_id: Uuid) -> StoreResult<Vec<ApiKey>> {
        let inner = self.inner.read().await;
        let mut keys: Vec<ApiKey> = inner
            .api_keys
            .values()
            .filter(|k| k.account_id == account_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "audit sink unavailable"
            )));
        }
        self.inner.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }
}
