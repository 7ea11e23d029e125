use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::services::error::{ServiceError, ServiceResult};

/// Subject prefix of the short-lived token handed out between password and
/// second-factor verification.
pub const TWO_FACTOR_SUBJECT_PREFIX: &str = "2fa:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by every token this service signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id, or `2fa:<account id>` for a pending challenge
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Makes tokens minted in the same second distinct
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// HS256 token service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    two_factor_ttl: Duration,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_token_ttl: Duration::days(config.refresh_token_expiry_days),
            two_factor_ttl: Duration::minutes(config.two_factor_expiry_minutes),
        }
    }

    pub fn issue(&self, subject: &str, token_type: TokenType, ttl: Duration) -> ServiceResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    pub fn issue_access(&self, subject: &str) -> ServiceResult<String> {
        self.issue(subject, TokenType::Access, self.access_token_ttl)
    }

    pub fn issue_refresh(&self, subject: &str, ttl: Duration) -> ServiceResult<String> {
        self.issue(subject, TokenType::Refresh, ttl)
    }

    /// Access-type token with the `2fa:` pseudo-subject.
    pub fn issue_two_factor_challenge(&self, account_id: Uuid) -> ServiceResult<String> {
        self.issue(
            &format!("{}{}", TWO_FACTOR_SUBJECT_PREFIX, account_id),
            TokenType::Access,
            self.two_factor_ttl,
        )
    }

    pub fn verify_claims(&self, token: &str, expected: TokenType) -> ServiceResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                ServiceError::InvalidToken
            })?
            .claims;

        if claims.token_type != expected || claims.sub.is_empty() {
            return Err(ServiceError::InvalidToken);
        }

        Ok(claims)
    }

    /// Returns the subject of a valid token of the expected type.
    pub fn verify(&self, token: &str, expected: TokenType) -> ServiceResult<String> {
        self.verify_claims(token, expected).map(|c| c.sub)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_ttl.num_seconds()
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    pub fn two_factor_expiry_seconds(&self) -> i64 {
        self.two_factor_ttl.num_seconds()
    }
}

/// Account id behind a `2fa:` subject; `None` for any other subject.
pub fn parse_two_factor_subject(subject: &str) -> Option<Uuid> {
    subject
        .strip_prefix(TWO_FACTOR_SUBJECT_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Account id behind a regular subject. Challenge subjects are rejected.
pub fn parse_account_subject(subject: &str) -> ServiceResult<Uuid> {
    Uuid::parse_str(subject).map_err(|_| ServiceError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> JwtService {
        JwtService::new(&JwtConfig {
            secret: secret.to_string(),
            access_token_expiry_minutes: 30,
            refresh_token_expiry_days: 7,
            two_factor_expiry_minutes: 5,
        })
    }

    #[test]
    fn access_token_round_trips_subject() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let token = jwt.issue_access("user_123")?;
        assert_eq!(jwt.verify(&token, TokenType::Access)?, "user_123");
        Ok(())
    }

    #[test]
    fn foreign_key_is_rejected() -> Result<(), anyhow::Error> {
        let token = service("secret-one").issue_access("user_123")?;
        let result = service("secret-two").verify(&token, TokenType::Access);
        assert!(matches!(result, Err(ServiceError::InvalidToken)));
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let token = jwt.issue("user_123", TokenType::Access, Duration::seconds(-60))?;
        assert!(matches!(
            jwt.verify(&token, TokenType::Access),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn refresh_token_is_not_an_access_token() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let refresh = jwt.issue_refresh("user_123", Duration::days(7))?;
        assert!(jwt.verify(&refresh, TokenType::Access).is_err());
        assert_eq!(jwt.verify(&refresh, TokenType::Refresh)?, "user_123");
        Ok(())
    }

    #[test]
    fn tampered_token_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let mut token = jwt.issue_access("user_123")?;
        token.push('x');
        assert!(jwt.verify(&token, TokenType::Access).is_err());
        Ok(())
    }

    #[test]
    fn same_second_tokens_differ() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let a = jwt.issue_refresh("user_123", Duration::days(7))?;
        let b = jwt.issue_refresh("user_123", Duration::days(7))?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn two_factor_challenge_carries_prefixed_subject() -> Result<(), anyhow::Error> {
        let jwt = service("secret-one");
        let id = Uuid::new_v4();
        let token = jwt.issue_two_factor_challenge(id)?;
        let sub = jwt.verify(&token, TokenType::Access)?;
        assert_eq!(parse_two_factor_subject(&sub), Some(id));
        assert!(parse_account_subject(&sub).is_err());
        assert_eq!(jwt.two_factor_expiry_seconds(), 300);
        Ok(())
    }
}
