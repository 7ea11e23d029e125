//! TOTP two-factor authentication with single-use backup codes.
//!
//! Lifecycle per account: disabled → pending setup → enabled → disabled.
//! `setup` stores the secret without enabling it; only a successful
//! `confirm_setup` turns 2FA on.

use rand::RngCore;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::TotpConfig;
use crate::models::{Account, AuditAction, AuditEvent, AuditStatus, RequestContext, TwoFactorState};
use crate::repository::AccountRepository;
use crate::services::audit::AuditRecorder;
use crate::services::credentials::CredentialService;
use crate::services::error::{ServiceError, ServiceResult};
use crate::utils::Password;

const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_BYTES: usize = 4;
const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;

/// Material the client renders as a QR code plus printable codes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Clone)]
pub struct TwoFactorService {
    accounts: Arc<dyn AccountRepository>,
    credentials: CredentialService,
    audit: AuditRecorder,
    issuer: String,
    skew: u8,
}

impl TwoFactorService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        credentials: CredentialService,
        audit: AuditRecorder,
        config: &TotpConfig,
    ) -> Self {
        Self {
            accounts,
            credentials,
            audit,
            issuer: config.issuer.clone(),
            skew: config.skew_steps,
        }
    }

    fn totp(&self, secret_base32: &str, email: &str) -> ServiceResult<TOTP> {
        let bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Invalid TOTP secret: {:?}", e)))?;
        self.build_totp(bytes, email)
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, email: &str) -> ServiceResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            self.skew,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            email.to_string(),
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to build TOTP: {}", e)))
    }

    async fn load(&self, account_id: Uuid) -> ServiceResult<Account> {
        self.accounts
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    /// Generates a fresh secret and backup codes and stores them pending.
    /// Calling it again while pending replaces the previous material.
    pub async fn setup(&self, account: &Account) -> ServiceResult<TwoFactorSetup> {
        if account.two_factor_state() == TwoFactorState::Enabled {
            return Err(ServiceError::TwoFactorAlreadyEnabled);
        }

        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Secret generation failed: {:?}", e)))?;
        let totp = self.build_totp(secret_bytes, &account.email)?;
        let secret = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();
        let backup_codes = generate_backup_codes();

        self.accounts
            .store_pending_two_factor(account.id, &secret, &backup_codes)
            .await?;

        tracing::info!(account_id = %account.id, "Two-factor setup initiated");

        Ok(TwoFactorSetup {
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Turns 2FA on when `code` matches the pending secret. A wrong code
    /// leaves the account untouched.
    pub async fn confirm_setup(
        &self,
        account_id: Uuid,
        code: &str,
        ctx: &RequestContext,
    ) -> ServiceResult<bool> {
        self.confirm_setup_at(account_id, code, ctx, unix_now()).await
    }

    pub async fn confirm_setup_at(
        &self,
        account_id: Uuid,
        code: &str,
        ctx: &RequestContext,
        unix_time: u64,
    ) -> ServiceResult<bool> {
        let account = self.load(account_id).await?;
        let secret = match (account.two_factor_state(), &account.totp_secret) {
            (TwoFactorState::Enabled, _) => return Err(ServiceError::TwoFactorAlreadyEnabled),
            (_, Some(secret)) => secret,
            (_, None) => return Err(ServiceError::TwoFactorNotInitiated),
        };

        if !self.totp(secret, &account.email)?.check(code.trim(), unix_time) {
            return Ok(false);
        }

        if !self.accounts.enable_two_factor(account.id).await? {
            return Err(ServiceError::TwoFactorNotInitiated);
        }

        self.audit
            .record(
                AuditEvent::new(AuditAction::TwoFactorEnabled, AuditStatus::Success, ctx)
                    .account(account.id),
            )
            .await;

        Ok(true)
    }

    /// TOTP first, then the backup codes. A matching backup code is spent.
    pub async fn verify_code(
        &self,
        account: &Account,
        code: &str,
        ctx: &RequestContext,
    ) -> ServiceResult<bool> {
        self.verify_code_at(account, code, ctx, unix_now()).await
    }

    pub async fn verify_code_at(
        &self,
        account: &Account,
        code: &str,
        ctx: &RequestContext,
        unix_time: u64,
    ) -> ServiceResult<bool> {
        if !account.is_2fa_enabled {
            return Ok(false);
        }
        let Some(secret) = &account.totp_secret else {
            return Ok(false);
        };

        let code = code.trim();
        if self.totp(secret, &account.email)?.check(code, unix_time) {
            return Ok(true);
        }

        let Some(matched) = find_backup_code(&account.backup_codes, code) else {
            return Ok(false);
        };

        // The snapshot may be stale; the store decides who spends the code.
        let Some(remaining) = self.accounts.consume_backup_code(account.id, matched).await? else {
            return Ok(false);
        };

        tracing::info!(account_id = %account.id, remaining, "Backup code used");
        self.audit
            .record(
                AuditEvent::new(AuditAction::TwoFactorBackupCodeUsed, AuditStatus::Success, ctx)
                    .account(account.id)
                    .details(json!({ "remaining_codes": remaining })),
            )
            .await;

        Ok(true)
    }

    pub async fn disable(
        &self,
        account_id: Uuid,
        password: &Password,
        code: &str,
        ctx: &RequestContext,
    ) -> ServiceResult<()> {
        let account = self.load(account_id).await?;
        if !account.is_2fa_enabled {
            return Err(ServiceError::TwoFactorNotEnabled);
        }

        if !self.credentials.verify_password(&account, password).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        if !self.verify_code(&account, code, ctx).await? {
            return Err(ServiceError::InvalidCode);
        }

        self.accounts.clear_two_factor(account.id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditAction::TwoFactorDisabled, AuditStatus::Success, ctx)
                    .account(account.id),
            )
            .await;

        Ok(())
    }

    /// Backup codes left on the account.
    pub async fn remaining_backup_codes(&self, account_id: Uuid) -> ServiceResult<usize> {
        Ok(self.load(account_id).await?.backup_codes.len())
    }
}

fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::rngs::OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut bytes = [0u8; BACKUP_CODE_BYTES];
            rng.fill_bytes(&mut bytes);
            hex::encode_upper(bytes)
        })
        .collect()
}

/// Compares against every stored code without short-circuiting.
fn find_backup_code<'a>(codes: &'a [String], candidate: &str) -> Option<&'a str> {
    let candidate = candidate.to_ascii_uppercase();
    let mut found = None;
    for code in codes {
        if bool::from(code.as_bytes().ct_eq(candidate.as_bytes())) {
            found = Some(code.as_str());
        }
    }
    found
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockoutConfig;
    use crate::repository::MemoryStore;
    use crate::utils::Argon2Hasher;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: TwoFactorService,
        account: Account,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hasher = Argon2Hasher::new(1024, 1).expect("valid params");
        let hash = hasher
            .hash(&Password::new("Str0ng!Pass"))
            .expect("hash")
            .into_string();
        let account = Account::new(
            "carol@example.com".to_string(),
            None,
            "Carol".to_string(),
            hash,
        );
        store.insert_account(&account).await.expect("insert");

        let audit = AuditRecorder::new(store.clone());
        let credentials = CredentialService::new(
            store.clone(),
            hasher,
            audit.clone(),
            &LockoutConfig {
                max_login_attempts: 5,
                lockout_minutes: 30,
            },
        );
        let service = TwoFactorService::new(
            store.clone(),
            credentials,
            audit,
            &TotpConfig {
                issuer: "User Management System".to_string(),
                skew_steps: 1,
            },
        );

        Fixture {
            store,
            service,
            account,
        }
    }

    fn code_at(service: &TwoFactorService, secret: &str, time: u64) -> String {
        service
            .totp(secret, "carol@example.com")
            .expect("totp")
            .generate(time)
    }

    async fn reload(f: &Fixture) -> Account {
        f.store
            .find_account_by_id(f.account.id)
            .await
            .expect("store")
            .expect("account")
    }

    #[tokio::test]
    async fn setup_stores_pending_secret_and_ten_codes() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let setup = f.service.setup(&f.account).await?;

        assert_eq!(setup.backup_codes.len(), 10);
        assert!(setup
            .backup_codes
            .iter()
            .all(|c| c.len() == 8 && c.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_lowercase())));
        assert!(setup.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(setup.provisioning_uri.contains("carol%40example.com") || setup.provisioning_uri.contains("carol@example.com"));

        let account = reload(&f).await;
        assert_eq!(account.two_factor_state(), TwoFactorState::PendingSetup);
        assert!(!account.is_2fa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_code_never_enables() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let setup = f.service.setup(&f.account).await?;
        let good = code_at(&f.service, &setup.secret, NOW);
        let wrong = if good == "000000" { "111111" } else { "000000" };

        let ctx = RequestContext::default();
        assert!(!f.service.confirm_setup_at(f.account.id, wrong, &ctx, NOW).await?);
        assert!(!reload(&f).await.is_2fa_enabled);

        assert!(f.service.confirm_setup_at(f.account.id, &good, &ctx, NOW).await?);
        assert!(reload(&f).await.is_2fa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn confirm_without_setup_is_not_initiated() {
        let f = fixture().await;
        let err = f
            .service
            .confirm_setup(f.account.id, "123456", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorNotInitiated));
    }

    #[tokio::test]
    async fn setup_twice_when_enabled_fails() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let setup = f.service.setup(&f.account).await?;
        let code = code_at(&f.service, &setup.secret, NOW);
        f.service
            .confirm_setup_at(f.account.id, &code, &RequestContext::default(), NOW)
            .await?;

        let err = f.service.setup(&reload(&f).await).await.unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorAlreadyEnabled));
        Ok(())
    }

    #[tokio::test]
    async fn adjacent_step_is_accepted() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let setup = f.service.setup(&f.account).await?;
        let previous_step = code_at(&f.service, &setup.secret, NOW - TOTP_STEP_SECONDS);
        assert!(
            f.service
                .confirm_setup_at(f.account.id, &previous_step, &RequestContext::default(), NOW)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn backup_code_is_single_use() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let ctx = RequestContext::default();
        let setup = f.service.setup(&f.account).await?;
        let code = code_at(&f.service, &setup.secret, NOW);
        f.service
            .confirm_setup_at(f.account.id, &code, &ctx, NOW)
            .await?;

        let backup = setup.backup_codes[3].clone();
        let account = reload(&f).await;
        assert!(f.service.verify_code_at(&account, &backup.to_lowercase(), &ctx, NOW).await?);
        assert_eq!(f.service.remaining_backup_codes(f.account.id).await?, 9);

        // Even with the stale snapshot that still lists the code.
        assert!(!f.service.verify_code_at(&account, &backup, &ctx, NOW).await?);
        let account = reload(&f).await;
        assert!(!f.service.verify_code_at(&account, &backup, &ctx, NOW).await?);
        assert_eq!(f.service.remaining_backup_codes(f.account.id).await?, 9);
        Ok(())
    }

    #[tokio::test]
    async fn verify_is_false_when_not_enabled() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let setup = f.service.setup(&f.account).await?;
        let account = reload(&f).await;
        let code = code_at(&f.service, &setup.secret, NOW);
        assert!(!f.service.verify_code_at(&account, &code, &RequestContext::default(), NOW).await?);
        Ok(())
    }

    #[tokio::test]
    async fn disable_requires_password_and_code() -> Result<(), anyhow::Error> {
        let f = fixture().await;
        let ctx = RequestContext::default();
        let setup = f.service.setup(&f.account).await?;
        let code = code_at(&f.service, &setup.secret, NOW);
        f.service
            .confirm_setup_at(f.account.id, &code, &ctx, NOW)
            .await?;

        let err = f
            .service
            .disable(f.account.id, &Password::new("nope"), &setup.backup_codes[0], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));

        let err = f
            .service
            .disable(f.account.id, &Password::new("Str0ng!Pass"), "ZZZZZZZZ", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCode));

        f.service
            .disable(f.account.id, &Password::new("Str0ng!Pass"), &setup.backup_codes[0], &ctx)
            .await?;
        let account = reload(&f).await;
        assert_eq!(account.two_factor_state(), TwoFactorState::Disabled);
        assert!(account.backup_codes.is_empty());

        let err = f
            .service
            .disable(f.account.id, &Password::new("Str0ng!Pass"), "123456", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorNotEnabled));
        Ok(())
    }
}
