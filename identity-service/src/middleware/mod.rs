pub mod auth;
pub mod context;

pub use auth::{auth_middleware, guard, require_middleware, AccountOwner, AuthUser, Principal};
