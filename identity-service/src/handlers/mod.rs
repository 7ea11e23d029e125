//! HTTP handlers. Thin: parse, call a service, shape the response.

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod metrics;
pub mod permissions;
pub mod roles;
pub mod two_factor;
pub mod users;
