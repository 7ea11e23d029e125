use crate::error::AppError;
use crate::rate_limit::{Decision, RuleTable, SlidingWindowLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// State handed to [`sliding_window_middleware`].
pub trait RateLimitContext: Clone + Send + Sync + 'static {
    fn limiter(&self) -> &SlidingWindowLimiter;

    fn rules(&self) -> &RuleTable;

    /// Subject of a valid bearer token carried by the request, if any.
    fn token_subject(&self, headers: &HeaderMap) -> Option<String>;
}

/// Resolves the caller: `user:<subject>` for a valid token, otherwise
/// `ip:<addr>` from the first forwarded-for hop, the real-ip header, or the
/// socket peer, in that order.
pub fn client_identity<S: RateLimitContext>(state: &S, req: &Request) -> String {
    if let Some(subject) = state.token_subject(req.headers()) {
        return format!("user:{}", subject);
    }

    match client_ip(req) {
        Some(ip) => format!("ip:{}", ip),
        None => "ip:unknown".to_string(),
    }
}

pub fn client_ip(req: &Request) -> Option<String> {
    client_ip_from_parts(req.headers(), req.extensions())
}

/// Same resolution as [`client_ip`] for extractors that only see parts.
pub fn client_ip_from_parts(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Applies the first matching rule; requests matching no rule pass untouched.
pub async fn sliding_window_middleware<S: RateLimitContext>(
    State(state): State<S>,
    request: Request,
    next: Next,
) -> Response {
    let Some(rule) = state.rules().find(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let client = client_identity(&state, &request);
    let key = format!("rate_limit:{}:{}", client, rule.name);
    let decision = state.limiter().check(&key, rule.quota).await;

    if !decision.allowed {
        tracing::warn!(
            client = %client,
            rule = %rule.name,
            retry_after = ?decision.retry_after,
            "Rate limit exceeded"
        );
        let mut response = AppError::TooManyRequests(
            "Rate limit exceeded. Please try again later.".to_string(),
            decision.retry_after,
        )
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}
