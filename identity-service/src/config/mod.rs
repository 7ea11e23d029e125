use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub expose_error_details: bool,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub lockout: LockoutConfig,
    pub password: PasswordConfig,
    pub totp: TotpConfig,
    pub bootstrap: BootstrapConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Per-statement timeout applied by the store.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Unset means the rate limiter runs on the in-process store only.
    pub url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub two_factor_expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of "remember me" sessions. Regular sessions live as long as
    /// their refresh token.
    pub extended_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_login_attempts: i32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_number: bool,
    pub require_special: bool,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
}

#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub issuer: String,
    /// Accepted clock drift, in 30-second steps either side of now.
    pub skew_steps: u8,
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    pub superuser_email: Option<String>,
    pub superuser_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub refresh_attempts: u32,
    pub refresh_window_seconds: u64,
    pub two_factor_attempts: u32,
    pub two_factor_window_seconds: u64,
    pub read_attempts: u32,
    pub read_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_attempts: 5,
            login_window_seconds: 300,
            register_attempts: 3,
            register_window_seconds: 3600,
            refresh_attempts: 10,
            refresh_window_seconds: 300,
            two_factor_attempts: 5,
            two_factor_window_seconds: 300,
            read_attempts: 100,
            read_window_seconds: 300,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_number: true,
            require_special: true,
            hash_memory_kib: 19_456,
            hash_iterations: 2,
        }
    }
}

impl AuthConfig {
    /// Development defaults with the given signing secret. Nothing is read
    /// from the environment.
    pub fn defaults(jwt_secret: impl Into<String>) -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            expose_error_details: true,
            database: DatabaseConfig {
                url: "postgres://localhost/identity".to_string(),
                max_connections: 10,
                min_connections: 1,
                timeout_ms: 3000,
            },
            redis: RedisConfig {
                url: None,
                timeout_ms: 250,
            },
            jwt: JwtConfig {
                secret: jwt_secret.into(),
                access_token_expiry_minutes: 30,
                refresh_token_expiry_days: 7,
                two_factor_expiry_minutes: 5,
            },
            session: SessionConfig {
                extended_expiry_days: 30,
            },
            lockout: LockoutConfig {
                max_login_attempts: 5,
                lockout_minutes: 30,
            },
            password: PasswordConfig::default(),
            totp: TotpConfig {
                issuer: "User Management System".to_string(),
                skew_steps: 1,
            },
            bootstrap: BootstrapConfig::default(),
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = PasswordConfig::default();
        let limits = RateLimitConfig::default();

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            expose_error_details: get_parsed(
                "EXPOSE_ERROR_DETAILS",
                if is_prod { "false" } else { "true" },
                false,
            )?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                timeout_ms: get_parsed("DATABASE_TIMEOUT_MS", "3000", is_prod)?,
            },
            redis: RedisConfig {
                url: get_optional_env("REDIS_URL"),
                timeout_ms: get_parsed("REDIS_TIMEOUT_MS", "250", is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                access_token_expiry_minutes: get_parsed(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "30",
                    is_prod,
                )?,
                refresh_token_expiry_days: get_parsed(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "7",
                    is_prod,
                )?,
                two_factor_expiry_minutes: get_parsed(
                    "JWT_TWO_FACTOR_EXPIRY_MINUTES",
                    "5",
                    is_prod,
                )?,
            },
            session: SessionConfig {
                extended_expiry_days: get_parsed("SESSION_EXTENDED_EXPIRY_DAYS", "30", is_prod)?,
            },
            lockout: LockoutConfig {
                max_login_attempts: get_parsed("MAX_LOGIN_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: get_parsed("ACCOUNT_LOCKOUT_MINUTES", "30", is_prod)?,
            },
            password: PasswordConfig {
                min_length: get_parsed("PASSWORD_MIN_LENGTH", "8", is_prod)?,
                require_uppercase: get_parsed("PASSWORD_REQUIRE_UPPERCASE", "true", is_prod)?,
                require_lowercase: get_parsed("PASSWORD_REQUIRE_LOWERCASE", "true", is_prod)?,
                require_number: get_parsed("PASSWORD_REQUIRE_NUMBER", "true", is_prod)?,
                require_special: get_parsed("PASSWORD_REQUIRE_SPECIAL", "true", is_prod)?,
                hash_memory_kib: get_parsed(
                    "PASSWORD_HASH_MEMORY_KIB",
                    &defaults.hash_memory_kib.to_string(),
                    is_prod,
                )?,
                hash_iterations: get_parsed(
                    "PASSWORD_HASH_ITERATIONS",
                    &defaults.hash_iterations.to_string(),
                    is_prod,
                )?,
            },
            totp: TotpConfig {
                issuer: get_env("TOTP_ISSUER", Some("User Management System"), is_prod)?,
                skew_steps: get_parsed("TOTP_SKEW_STEPS", "1", is_prod)?,
            },
            bootstrap: BootstrapConfig {
                superuser_email: get_optional_env("FIRST_SUPERUSER_EMAIL"),
                superuser_password: get_optional_env("FIRST_SUPERUSER_PASSWORD"),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_parsed(
                    "RATE_LIMIT_LOGIN_ATTEMPTS",
                    &limits.login_attempts.to_string(),
                    is_prod,
                )?,
                login_window_seconds: get_parsed(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    &limits.login_window_seconds.to_string(),
                    is_prod,
                )?,
                register_attempts: get_parsed(
                    "RATE_LIMIT_REGISTER_ATTEMPTS",
                    &limits.register_attempts.to_string(),
                    is_prod,
                )?,
                register_window_seconds: get_parsed(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    &limits.register_window_seconds.to_string(),
                    is_prod,
                )?,
                refresh_attempts: get_parsed(
                    "RATE_LIMIT_REFRESH_ATTEMPTS",
                    &limits.refresh_attempts.to_string(),
                    is_prod,
                )?,
                refresh_window_seconds: get_parsed(
                    "RATE_LIMIT_REFRESH_WINDOW_SECONDS",
                    &limits.refresh_window_seconds.to_string(),
                    is_prod,
                )?,
                two_factor_attempts: get_parsed(
                    "RATE_LIMIT_TWO_FACTOR_ATTEMPTS",
                    &limits.two_factor_attempts.to_string(),
                    is_prod,
                )?,
                two_factor_window_seconds: get_parsed(
                    "RATE_LIMIT_TWO_FACTOR_WINDOW_SECONDS",
                    &limits.two_factor_window_seconds.to_string(),
                    is_prod,
                )?,
                read_attempts: get_parsed(
                    "RATE_LIMIT_READ_ATTEMPTS",
                    &limits.read_attempts.to_string(),
                    is_prod,
                )?,
                read_window_seconds: get_parsed(
                    "RATE_LIMIT_READ_WINDOW_SECONDS",
                    &limits.read_window_seconds.to_string(),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.len() < 32 && self.is_prod() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 bytes in production"
            )));
        }

        if self.jwt.secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.lockout.max_login_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAX_LOGIN_ATTEMPTS must be positive"
            )));
        }

        if self.bootstrap.superuser_email.is_some() != self.bootstrap.superuser_password.is_some()
        {
            tracing::warn!(
                "Only one of FIRST_SUPERUSER_EMAIL / FIRST_SUPERUSER_PASSWORD is set; superuser bootstrap is skipped"
            );
        }

        if self.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.expose_error_details {
                tracing::error!(
                    "EXPOSE_ERROR_DETAILS is on in production - internal error text will reach clients"
                );
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
