//! Identity core: credentials, tokens, sessions, permissions, two-factor,
//! API keys and the audit trail.
//!
//! Every service takes its repositories through its constructor;
//! [`Services::new`] wires them all from one store.

pub mod accounts;
pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod permissions;
pub mod policy;
pub mod sessions;
pub mod two_factor;

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::repository::IdentityStore;
use crate::utils::Argon2Hasher;

pub use accounts::AccountService;
pub use api_keys::{ApiKeyService, CreatedApiKey};
pub use audit::AuditRecorder;
pub use auth::{AuthService, LoginOutcome, Registration};
pub use credentials::CredentialService;
pub use error::{ServiceError, ServiceResult};
pub use jwt::{JwtService, TokenType};
pub use permissions::{PermissionService, Requirement, RoleUpdate};
pub use policy::PasswordPolicy;
pub use sessions::{SessionService, TokenPair};
pub use two_factor::{TwoFactorService, TwoFactorSetup};

/// All identity services, sharing one store.
#[derive(Clone)]
pub struct Services {
    pub audit: AuditRecorder,
    pub jwt: JwtService,
    pub credentials: CredentialService,
    pub sessions: SessionService,
    pub permissions: PermissionService,
    pub two_factor: TwoFactorService,
    pub api_keys: ApiKeyService,
    pub accounts: AccountService,
    pub auth: AuthService,
}

impl Services {
    pub fn new<S>(store: Arc<S>, config: &AuthConfig) -> Result<Self, anyhow::Error>
    where
        S: IdentityStore + 'static,
    {
        let hasher = Argon2Hasher::new(config.password.hash_memory_kib, config.password.hash_iterations)?;
        let audit = AuditRecorder::new(store.clone());
        let jwt = JwtService::new(&config.jwt);

        let credentials =
            CredentialService::new(store.clone(), hasher, audit.clone(), &config.lockout);
        let sessions = SessionService::new(
            store.clone(),
            jwt.clone(),
            audit.clone(),
            &config.jwt,
            &config.session,
        );
        let permissions = PermissionService::new(store.clone(), store.clone(), audit.clone());
        let two_factor = TwoFactorService::new(
            store.clone(),
            credentials.clone(),
            audit.clone(),
            &config.totp,
        );
        let api_keys = ApiKeyService::new(store.clone(), audit.clone());
        let accounts = AccountService::new(
            store.clone(),
            credentials.clone(),
            sessions.clone(),
            permissions.clone(),
            audit.clone(),
        );
        let auth = AuthService::new(
            store,
            credentials.clone(),
            sessions.clone(),
            two_factor.clone(),
            jwt.clone(),
            PasswordPolicy::new(config.password.clone()),
            audit.clone(),
        );

        Ok(Self {
            audit,
            jwt,
            credentials,
            sessions,
            permissions,
            two_factor,
            api_keys,
            accounts,
            auth,
        })
    }
}
