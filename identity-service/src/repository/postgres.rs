//! PostgreSQL implementation of the repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{
    AccountRepository, ApiKeyRepository, AuditRepository, FailedLogin, RbacRepository,
    SessionRepository, StoreError, StoreResult,
};
use crate::models::{Account, ApiKey, AuditEvent, AuditQuery, Permission, Role, Session};

const ACCOUNT_COLUMNS: &str = "id, email, username, display_name, password_hash, is_active, \
    is_verified, is_superuser, failed_login_attempts, locked_until, last_login, \
    password_changed_at, is_2fa_enabled, totp_secret, backup_codes, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, account_id, session_token, refresh_token_hash, ip_address, \
    user_agent, device_info, is_active, expires_at, last_activity, created_at";

const API_KEY_COLUMNS: &str = "id, account_id, name, key_hash, key_prefix, scopes, expires_at, \
    is_active, usage_count, last_used_at, created_at";

const AUDIT_COLUMNS: &str = "id, account_id, action, resource_type, resource_id, ip_address, \
    user_agent, endpoint, method, details, status, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bounds every statement by the configured timeout.
    async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_sqlx_error(e)),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Database call timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let field = db_err.constraint().unwrap_or("unique value").to_string();
            return StoreError::Duplicate(field);
        }
    }
    StoreError::Unavailable(anyhow::anyhow!(err))
}

// ==================== Account Operations ====================

#[async_trait]
impl AccountRepository for PgStore {
    async fn insert_account(&self, a: &Account) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                INSERT INTO accounts (id, email, username, display_name, password_hash,
                    is_active, is_verified, is_superuser, failed_login_attempts, locked_until,
                    last_login, password_changed_at, is_2fa_enabled, totp_secret, backup_codes,
                    created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(a.id)
            .bind(&a.email)
            .bind(&a.username)
            .bind(&a.display_name)
            .bind(&a.password_hash)
            .bind(a.is_active)
            .bind(a.is_verified)
            .bind(a.is_superuser)
            .bind(a.failed_login_attempts)
            .bind(a.locked_until)
            .bind(a.last_login)
            .bind(a.password_changed_at)
            .bind(a.is_2fa_enabled)
            .bind(&a.totp_secret)
            .bind(&a.backup_codes)
            .bind(a.created_at)
            .bind(a.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        self.run(
            sqlx::query_as::<_, Account>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS);
        self.run(
            sqlx::query_as::<_, Account>(&sql)
                .bind(email)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE username = $1", ACCOUNT_COLUMNS);
        self.run(
            sqlx::query_as::<_, Account>(&sql)
                .bind(username)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<FailedLogin> {
        // SET expressions read the pre-update row, so the CASE sees the old counter.
        let row: Option<(i32, Option<DateTime<Utc>>)> = self
            .run(
                sqlx::query_as(
                    r#"
                    UPDATE accounts
                    SET failed_login_attempts = failed_login_attempts + 1,
                        locked_until = CASE
                            WHEN failed_login_attempts + 1 >= $2 THEN $3
                            ELSE locked_until
                        END,
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING failed_login_attempts, locked_until
                    "#,
                )
                .bind(id)
                .bind(max_attempts)
                .bind(lock_until)
                .fetch_optional(&self.pool),
            )
            .await?;

        let (attempts, locked_until) = row.ok_or_else(|| {
            StoreError::Unavailable(anyhow::anyhow!("account {} not found for update", id))
        })?;

        Ok(FailedLogin {
            attempts,
            locked_until,
        })
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                UPDATE accounts
                SET failed_login_attempts = 0, locked_until = NULL, last_login = $2, updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, hash: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "UPDATE accounts SET password_hash = $2, password_changed_at = $3, updated_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(hash)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("UPDATE accounts SET is_active = $2, updated_at = NOW() WHERE id = $1")
                    .bind(id)
                    .bind(active)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn store_pending_two_factor(
        &self,
        id: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                UPDATE accounts
                SET totp_secret = $2, backup_codes = $3, is_2fa_enabled = FALSE, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(secret)
            .bind(backup_codes)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn enable_two_factor(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query(
                    "UPDATE accounts SET is_2fa_enabled = TRUE, updated_at = NOW() WHERE id = $1 AND totp_secret IS NOT NULL",
                )
                .bind(id)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_two_factor(&self, id: Uuid) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                UPDATE accounts
                SET is_2fa_enabled = FALSE, totp_secret = NULL, backup_codes = '{}', updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn consume_backup_code(&self, id: Uuid, code: &str) -> StoreResult<Option<usize>> {
        // The ANY() guard makes concurrent redemption of one code admit a single winner.
        let remaining: Option<(i32,)> = self
            .run(
                sqlx::query_as(
                    r#"
                    UPDATE accounts
                    SET backup_codes = array_remove(backup_codes, $2), updated_at = NOW()
                    WHERE id = $1 AND $2 = ANY(backup_codes)
                    RETURNING cardinality(backup_codes)
                    "#,
                )
                .bind(id)
                .bind(code)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(remaining.map(|(n,)| n.max(0) as usize))
    }

    async fn delete_account(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("DELETE FROM accounts WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Role & Permission Operations ====================

#[async_trait]
impl RbacRepository for PgStore {
    async fn insert_permission(&self, p: &Permission) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "INSERT INTO permissions (id, name, resource, action, description, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(p.id)
            .bind(&p.name)
            .bind(&p.resource)
            .bind(&p.action)
            .bind(&p.description)
            .bind(p.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_permission_by_id(&self, id: Uuid) -> StoreResult<Option<Permission>> {
        self.run(
            sqlx::query_as::<_, Permission>(
                "SELECT id, name, resource, action, description, created_at FROM permissions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        self.run(
            sqlx::query_as::<_, Permission>(
                "SELECT id, name, resource, action, description, created_at FROM permissions WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        self.run(
            sqlx::query_as::<_, Permission>(
                "SELECT id, name, resource, action, description, created_at FROM permissions ORDER BY name",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("DELETE FROM permissions WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_role(&self, r: &Role) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "INSERT INTO roles (id, name, description, is_system, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(r.id)
            .bind(&r.name)
            .bind(&r.description)
            .bind(r.is_system)
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_role(&self, r: &Role) -> StoreResult<()> {
        self.run(
            sqlx::query("UPDATE roles SET name = $2, description = $3, updated_at = $4 WHERE id = $1")
                .bind(r.id)
                .bind(&r.name)
                .bind(&r.description)
                .bind(r.updated_at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_role_by_id(&self, id: Uuid) -> StoreResult<Option<Role>> {
        self.run(
            sqlx::query_as::<_, Role>(
                "SELECT id, name, description, is_system, created_at, updated_at FROM roles WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        self.run(
            sqlx::query_as::<_, Role>(
                "SELECT id, name, description, is_system, created_at, updated_at FROM roles WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.run(
            sqlx::query_as::<_, Role>(
                "SELECT id, name, description, is_system, created_at, updated_at FROM roles ORDER BY name",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("DELETE FROM roles WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> StoreResult<()> {
        self.run(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(permission_ids)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        })
        .await
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        self.run(
            sqlx::query_as::<_, Permission>(
                r#"
                SELECT p.id, p.name, p.resource, p.action, p.description, p.created_at
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                WHERE rp.role_id = $1
                ORDER BY p.name
                "#,
            )
            .bind(role_id)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn count_role_members(&self, role_id: Uuid) -> StoreResult<i64> {
        let (count,): (i64,) = self
            .run(
                sqlx::query_as("SELECT COUNT(*) FROM account_roles WHERE role_id = $1")
                    .bind(role_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(count)
    }

    async fn assign_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query(
                    "INSERT INTO account_roles (account_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(account_id)
                .bind(role_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role(&self, account_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("DELETE FROM account_roles WHERE account_id = $1 AND role_id = $2")
                    .bind(account_id)
                    .bind(role_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn account_roles(&self, account_id: Uuid) -> StoreResult<Vec<Role>> {
        self.run(
            sqlx::query_as::<_, Role>(
                r#"
                SELECT r.id, r.name, r.description, r.is_system, r.created_at, r.updated_at
                FROM roles r
                JOIN account_roles ar ON ar.role_id = r.id
                WHERE ar.account_id = $1
                ORDER BY r.name
                "#,
            )
            .bind(account_id)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn account_permissions(&self, account_id: Uuid) -> StoreResult<Vec<Permission>> {
        self.run(
            sqlx::query_as::<_, Permission>(
                r#"
                SELECT DISTINCT p.id, p.name, p.resource, p.action, p.description, p.created_at
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                JOIN account_roles ar ON ar.role_id = rp.role_id
                WHERE ar.account_id = $1
                ORDER BY p.name
                "#,
            )
            .bind(account_id)
            .fetch_all(&self.pool),
        )
        .await
    }
}

// ==================== Session Operations ====================

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert_session(&self, s: &Session) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                INSERT INTO sessions (id, account_id, session_token, refresh_token_hash, ip_address,
                    user_agent, device_info, is_active, expires_at, last_activity, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(s.id)
            .bind(s.account_id)
            .bind(&s.session_token)
            .bind(&s.refresh_token_hash)
            .bind(&s.ip_address)
            .bind(&s.user_agent)
            .bind(&s.device_info)
            .bind(s.is_active)
            .bind(s.expires_at)
            .bind(s.last_activity)
            .bind(s.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_session_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        self.run(
            sqlx::query_as::<_, Session>(&sql)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn find_session_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE refresh_token_hash = $1",
            SESSION_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, Session>(&sql)
                .bind(hash)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(
            sqlx::query("UPDATE sessions SET last_activity = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn deactivate_session_by_refresh_hash(
        &self,
        hash: &str,
    ) -> StoreResult<Option<Session>> {
        let sql = format!(
            "UPDATE sessions SET is_active = FALSE WHERE refresh_token_hash = $1 AND is_active RETURNING {}",
            SESSION_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, Session>(&sql)
                .bind(hash)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn deactivate_session(&self, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query("UPDATE sessions SET is_active = FALSE WHERE id = $1 AND is_active")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_account_sessions(&self, account_id: Uuid) -> StoreResult<u64> {
        let result = self
            .run(
                sqlx::query(
                    "UPDATE sessions SET is_active = FALSE WHERE account_id = $1 AND is_active",
                )
                .bind(account_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = self
            .run(
                sqlx::query("UPDATE sessions SET is_active = FALSE WHERE is_active AND expires_at <= $1")
                    .bind(now)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_sessions(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = self
            .run(
                sqlx::query("DELETE FROM sessions WHERE NOT is_active AND expires_at < $1")
                    .bind(before)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_account_sessions(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE account_id = $1 AND (is_active OR NOT $2) ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, Session>(&sql)
                .bind(account_id)
                .bind(active_only)
                .fetch_all(&self.pool),
        )
        .await
    }
}

// ==================== API Key Operations ====================

#[async_trait]
impl ApiKeyRepository for PgStore {
    async fn insert_api_key(&self, k: &ApiKey) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                INSERT INTO api_keys (id, account_id, name, key_hash, key_prefix, scopes,
                    expires_at, is_active, usage_count, last_used_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(k.id)
            .bind(k.account_id)
            .bind(&k.name)
            .bind(&k.key_hash)
            .bind(&k.key_prefix)
            .bind(&k.scopes)
            .bind(k.expires_at)
            .bind(k.is_active)
            .bind(k.usage_count)
            .bind(k.last_used_at)
            .bind(k.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> StoreResult<Option<ApiKey>> {
        let sql = format!("SELECT {} FROM api_keys WHERE key_hash = $1", API_KEY_COLUMNS);
        self.run(
            sqlx::query_as::<_, ApiKey>(&sql)
                .bind(hash)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn record_api_key_use(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(
            sqlx::query(
                "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn deactivate_api_key(&self, account_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let result = self
            .run(
                sqlx::query(
                    "UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND account_id = $2 AND is_active",
                )
                .bind(id)
                .bind(account_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_api_keys(&self, account_id: Uuid) -> StoreResult<Vec<ApiKey>> {
        let sql = format!(
            "SELECT {} FROM api_keys WHERE account_id = $1 ORDER BY created_at DESC",
            API_KEY_COLUMNS
        );
        self.run(
            sqlx::query_as::<_, ApiKey>(&sql)
                .bind(account_id)
                .fetch_all(&self.pool),
        )
        .await
    }
}

// ==================== Audit Operations ====================

#[async_trait]
impl AuditRepository for PgStore {
    async fn insert_audit_event(&self, e: &AuditEvent) -> StoreResult<()> {
        self.run(
            sqlx::query(
                r#"
                INSERT INTO audit_events (id, account_id, action, resource_type, resource_id,
                    ip_address, user_agent, endpoint, method, details, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(e.id)
            .bind(e.account_id)
            .bind(&e.action)
            .bind(&e.resource_type)
            .bind(&e.resource_id)
            .bind(&e.ip_address)
            .bind(&e.user_agent)
            .bind(&e.endpoint)
            .bind(&e.method)
            .bind(&e.details)
            .bind(&e.status)
            .bind(e.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn list_audit_events(&self, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM audit_events WHERE TRUE",
            AUDIT_COLUMNS
        ));

        if let Some(account_id) = query.account_id {
            qb.push(" AND account_id = ").push_bind(account_id);
        }
        if let Some(action) = &query.action {
            qb.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(status) = &query.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(query.effective_limit());

        self.run(async {
            qb.build_query_as::<AuditEvent>()
                .fetch_all(&self.pool)
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn failed_login_locks_on_threshold() -> Result<(), anyhow::Error> {
        let url = std::env::var("DATABASE_URL")?;
        let pool = sqlx::PgPool::connect(&url).await?;
        db::run_migrations(&pool).await?;
        let store = PgStore::new(pool, Duration::from_secs(5));

        let account = Account::new(
            format!("{}@example.com", Uuid::new_v4()),
            None,
            "Lockout".to_string(),
            "hash".to_string(),
        );
        store.insert_account(&account).await?;

        let until = Utc::now() + chrono::Duration::minutes(30);
        for _ in 0..4 {
            let state = store.record_failed_login(account.id, 5, until).await?;
            assert!(state.locked_until.is_none());
        }
        let state = store.record_failed_login(account.id, 5, until).await?;
        assert_eq!(state.attempts, 5);
        assert!(state.locked_until.is_some());

        store.delete_account(account.id).await?;
        Ok(())
    }
}
