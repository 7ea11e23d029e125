mod common;

use axum::http::StatusCode;
use common::{test_config, TestApp, PASSWORD};
use identity_service::models::AuditQuery;
use serde_json::json;

#[tokio::test]
async fn register_login_refresh_logout() {
    let app = TestApp::spawn().await;
    let account_id = app.register("alice@example.com").await;

    let tokens = app.login("alice@example.com").await;
    assert_eq!(tokens["token_type"], "bearer");
    let access = tokens["access_token"].as_str().expect("access token");
    let refresh = tokens["refresh_token"].as_str().expect("refresh token");

    let (status, me) = app.get("/api/v1/auth/me", access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], account_id.to_string());
    assert_eq!(me["email"], "alice@example.com");
    assert!(me.get("password_hash").is_none());

    let (status, refreshed) = app
        .post("/api/v1/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = refreshed["access_token"].as_str().expect("access token");
    let (status, me) = app.get("/api/v1/auth/me", new_access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], account_id.to_string());

    let (status, _) = app
        .post("/api/v1/auth/logout", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Logging out twice is harmless.
    let (status, _) = app
        .post("/api/v1/auth/logout", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = TestApp::spawn().await;
    app.register("bob@example.com").await;

    let (status, _) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({
                "email": "bob@example.com",
                "display_name": "Bob Again",
                "password": PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn weak_password_lists_every_violation() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({
                "email": "weak@example.com",
                "display_name": "Weak",
                "password": "short",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let details = body["details"].as_array().expect("violations listed");
    assert!(details.len() >= 2, "expected several violations: {}", body);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = TestApp::spawn().await;
    app.register("carol@example.com").await;

    let (wrong_status, wrong_body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "carol@example.com", "password": "Wr0ng!Pass" }),
        )
        .await;
    let (unknown_status, unknown_body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "nobody@example.com", "password": "Wr0ng!Pass" }),
        )
        .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body["error"], unknown_body["error"]);
}

#[tokio::test]
async fn repeated_failures_lock_the_account() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 100;
    let max_attempts = config.lockout.max_login_attempts;
    let app = TestApp::with_config(config).await;
    let account_id = app.register("dave@example.com").await;

    for _ in 0..max_attempts {
        let (status, _) = app
            .post(
                "/api/v1/auth/login",
                None,
                json!({ "email": "dave@example.com", "password": "Wr0ng!Pass" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused while locked.
    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "dave@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert!(body["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("locked")));

    let events = app
        .state
        .services
        .audit
        .list(&AuditQuery {
            account_id: Some(account_id),
            action: Some("account_locked".to_string()),
            ..Default::default()
        })
        .await
        .expect("audit query");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn change_password_ends_existing_sessions() {
    let app = TestApp::spawn().await;
    app.register("erin@example.com").await;
    let tokens = app.login("erin@example.com").await;
    let access = tokens["access_token"].as_str().expect("access token");
    let refresh = tokens["refresh_token"].as_str().expect("refresh token");

    let (status, _) = app
        .post(
            "/api/v1/auth/change-password",
            Some(access),
            json!({ "current_password": "Wr0ng!Pass", "new_password": "N3w!Password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/v1/auth/change-password",
            Some(access),
            json!({ "current_password": PASSWORD, "new_password": "N3w!Password" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/auth/refresh", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "erin@example.com", "password": "N3w!Password" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .request(axum::http::Method::GET, "/api/v1/auth/me", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/v1/auth/me", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A refresh token is not an access token.
    app.register("frank@example.com").await;
    let tokens = app.login("frank@example.com").await;
    let refresh = tokens["refresh_token"].as_str().expect("refresh token");
    let (status, _) = app.get("/api/v1/auth/me", refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_reports_in_memory_store() {
    let app = TestApp::spawn().await;
    let (status, body) = app
        .request(axum::http::Method::GET, "/health", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "in_memory");
}
