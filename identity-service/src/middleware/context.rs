use service_core::axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use service_core::middleware::rate_limit::client_ip_from_parts;
use std::convert::Infallible;

use crate::models::RequestContext;

/// Client metadata for audit events, taken from the request itself.
#[service_core::axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(RequestContext {
            ip_address: client_ip_from_parts(&parts.headers, &parts.extensions),
            user_agent,
            endpoint: Some(parts.uri.path().to_string()),
            method: Some(parts.method.to_string()),
        })
    }
}
