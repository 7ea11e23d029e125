pub mod password;
pub mod tokens;
pub mod validation;

pub use password::{Argon2Hasher, Password, PasswordHashString};
pub use tokens::{random_token, sha256_hex};
pub use validation::ValidatedJson;
