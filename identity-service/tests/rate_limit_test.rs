mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::TestApp;
use tower::util::ServiceExt;

fn login_from(ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(
            serde_json::json!({ "email": "nobody@example.com", "password": "Wr0ng!Pass" })
                .to_string(),
        ))
        .expect("request")
}

#[tokio::test]
async fn sixth_login_in_window_is_rejected() {
    let app = TestApp::spawn().await;
    let max = app.state.config.rate_limit.login_attempts;

    for attempt in 1..=max {
        let response = app
            .router
            .clone()
            .oneshot(login_from("203.0.113.7"))
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .expect("remaining header");
        assert_eq!(remaining, max - attempt);
    }

    let response = app
        .router
        .clone()
        .oneshot(login_from("203.0.113.7"))
        .await
        .expect("router");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Another client is unaffected.
    let response = app
        .router
        .clone()
        .oneshot(login_from("198.51.100.2"))
        .await
        .expect("router");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_never_limited() {
    let app = TestApp::spawn().await;

    for _ in 0..20 {
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}
