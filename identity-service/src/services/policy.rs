//! Password strength policy.

use crate::config::PasswordConfig;

const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "123456",
    "12345678",
    "123456789",
    "qwerty",
    "qwerty123",
    "abc123",
    "letmein",
    "welcome",
    "admin",
    "admin123",
    "iloveyou",
    "monkey",
    "dragon",
];

/// Errors related to password policy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    PasswordTooShort { min_length: usize, actual_length: usize },
    PasswordMissingUppercase,
    PasswordMissingLowercase,
    PasswordMissingNumber,
    PasswordMissingSpecial,
    PasswordTooCommon,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::PasswordTooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyError::PasswordMissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::PasswordMissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyError::PasswordMissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::PasswordMissingSpecial => write!(
                f,
                "Password must contain at least one special character ({})",
                SPECIAL_CHARACTERS
            ),
            PolicyError::PasswordTooCommon => write!(f, "Password is too common"),
        }
    }
}

impl std::error::Error for PolicyError {}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    config: PasswordConfig,
}

impl PasswordPolicy {
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    /// Every violation found, in a stable order. Empty means acceptable.
    pub fn check(&self, password: &str) -> Vec<PolicyError> {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.config.min_length {
            errors.push(PolicyError::PasswordTooShort {
                min_length: self.config.min_length,
                actual_length: length,
            });
        }

        if self.config.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.push(PolicyError::PasswordMissingUppercase);
        }

        if self.config.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            errors.push(PolicyError::PasswordMissingLowercase);
        }

        if self.config.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(PolicyError::PasswordMissingNumber);
        }

        if self.config.require_special && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c))
        {
            errors.push(PolicyError::PasswordMissingSpecial);
        }

        let lowered = password.to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            errors.push(PolicyError::PasswordTooCommon);
        }

        errors
    }

    /// Violation messages, ready for a validation error response.
    pub fn violations(&self, password: &str) -> Vec<String> {
        self.check(password).iter().map(ToString::to_string).collect()
    }
}
