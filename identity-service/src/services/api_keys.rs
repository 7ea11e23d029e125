//! Long-lived API keys for programmatic access.
//!
//! The plaintext key is shown once at creation. Only its SHA-256 digest is
//! stored, so a lost key has to be replaced, not recovered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{ApiKey, ApiKeyInfo, AuditAction, AuditEvent, AuditStatus, RequestContext};
use crate::repository::ApiKeyRepository;
use crate::services::audit::AuditRecorder;
use crate::services::error::{ServiceError, ServiceResult};
use crate::utils::{random_token, sha256_hex};

pub const API_KEY_PREFIX: &str = "imk_";
const KEY_BYTES: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub info: ApiKeyInfo,
    /// Plaintext key. Not retrievable again.
    pub key: String,
}

#[derive(Clone)]
pub struct ApiKeyService {
    keys: Arc<dyn ApiKeyRepository>,
    audit: AuditRecorder,
}

impl ApiKeyService {
    pub fn new(keys: Arc<dyn ApiKeyRepository>, audit: AuditRecorder) -> Self {
        Self { keys, audit }
    }

    pub async fn create(
        &self,
        account_id: Uuid,
        name: String,
        scopes: Option<Vec<String>>,
        expires_at: Option<DateTime<Utc>>,
        ctx: &RequestContext,
    ) -> ServiceResult<CreatedApiKey> {
        let now = Utc::now();
        if expires_at.is_some_and(|exp| exp <= now) {
            return Err(ServiceError::Validation(vec![
                "expires_at must be in the future".to_string(),
            ]));
        }

        let plaintext = format!("{}{}", API_KEY_PREFIX, random_token(KEY_BYTES));
        let key = ApiKey {
            id: Uuid::new_v4(),
            account_id,
            name,
            key_hash: sha256_hex(&plaintext),
            key_prefix: plaintext.chars().take(DISPLAY_PREFIX_LEN).collect(),
            scopes,
            expires_at,
            is_active: true,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
        };
        self.keys.insert_api_key(&key).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::ApiKeyCreated, AuditStatus::Success, ctx)
                    .account(account_id)
                    .resource("api_key", key.id)
                    .details(json!({ "name": key.name, "scopes": key.scopes })),
            )
            .await;

        Ok(CreatedApiKey {
            info: key.into(),
            key: plaintext,
        })
    }

    /// Resolves a presented key to its record and counts the use.
    pub async fn authenticate(&self, plaintext: &str) -> ServiceResult<ApiKey> {
        if !plaintext.starts_with(API_KEY_PREFIX) {
            return Err(ServiceError::InvalidToken);
        }

        let now = Utc::now();
        let key = self
            .keys
            .find_api_key_by_hash(&sha256_hex(plaintext))
            .await?
            .filter(|k| k.is_usable_at(now))
            .ok_or(ServiceError::InvalidToken)?;

        self.keys.record_api_key_use(key.id, now).await?;
        Ok(key)
    }

    pub async fn revoke(&self, account_id: Uuid, key_id: Uuid, ctx: &RequestContext) -> ServiceResult<()> {
        if !self.keys.deactivate_api_key(account_id, key_id).await? {
            return Err(ServiceError::NotFound("API key not found".to_string()));
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::ApiKeyRevoked, AuditStatus::Success, ctx)
                    .account(account_id)
                    .resource("api_key", key_id),
            )
            .await;
        Ok(())
    }

    pub async fn list(&self, account_id: Uuid) -> ServiceResult<Vec<ApiKeyInfo>> {
        Ok(self
            .keys
            .list_api_keys(account_id)
            .await?
            .into_iter()
            .map(ApiKeyInfo::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use chrono::Duration;

    fn service() -> ApiKeyService {
        let store = Arc::new(MemoryStore::new());
        ApiKeyService::new(store.clone(), AuditRecorder::new(store))
    }

    #[tokio::test]
    async fn created_key_authenticates_and_counts_usage() -> Result<(), anyhow::Error> {
        let keys = service();
        let owner = Uuid::new_v4();
        let created = keys
            .create(owner, "ci".to_string(), None, None, &RequestContext::default())
            .await?;

        assert!(created.key.starts_with(API_KEY_PREFIX));
        assert_eq!(created.info.key_prefix, created.key[..DISPLAY_PREFIX_LEN]);

        let key = keys.authenticate(&created.key).await?;
        assert_eq!(key.account_id, owner);
        keys.authenticate(&created.key).await?;

        let listed = keys.list(owner).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].usage_count, 2);
        assert!(listed[0].last_used_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn revoked_and_unknown_keys_are_rejected() -> Result<(), anyhow::Error> {
        let keys = service();
        let owner = Uuid::new_v4();
        let ctx = RequestContext::default();
        let created = keys.create(owner, "ci".to_string(), None, None, &ctx).await?;

        assert!(matches!(
            keys.revoke(Uuid::new_v4(), created.info.id, &ctx).await,
            Err(ServiceError::NotFound(_))
        ));
        keys.revoke(owner, created.info.id, &ctx).await?;

        assert!(matches!(
            keys.authenticate(&created.key).await,
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            keys.authenticate("imk_not-a-real-key").await,
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            keys.authenticate("no-prefix").await,
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn past_expiry_is_a_validation_error() {
        let keys = service();
        let result = keys
            .create(
                Uuid::new_v4(),
                "old".to_string(),
                None,
                Some(Utc::now() - Duration::minutes(1)),
                &RequestContext::default(),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }
}
