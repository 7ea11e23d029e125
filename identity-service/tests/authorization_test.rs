mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::TestApp;
use serde_json::json;
use tower::util::ServiceExt;

#[tokio::test]
async fn admin_routes_check_permissions() {
    let app = TestApp::spawn().await;
    let admin_id = app.register("admin@example.com").await;
    let user_id = app.register("user@example.com").await;
    app.make_admin(admin_id).await;

    let user_token = app.access_token("user@example.com").await;
    let admin_token = app.access_token("admin@example.com").await;

    let (status, body) = app.get("/api/v1/roles", &user_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("roles.read")));

    let (status, roles) = app.get("/api/v1/roles", &admin_token).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = roles
        .as_array()
        .expect("role list")
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert!(names.contains(&"Administrator"));

    let (status, account) = app
        .get(&format!("/api/v1/users/{}", user_id), &admin_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["email"], "user@example.com");

    let (status, _) = app
        .get(&format!("/api/v1/users/{}", admin_id), &user_token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn granted_role_shows_up_in_effective_permissions() {
    let app = TestApp::spawn().await;
    let admin_id = app.register("root@example.com").await;
    let user_id = app.register("jill@example.com").await;
    app.make_admin(admin_id).await;
    let admin_token = app.access_token("root@example.com").await;
    let user_token = app.access_token("jill@example.com").await;

    let (status, perms) = app.get("/api/v1/auth/me/permissions", &user_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms["permissions"], json!([]));

    let (status, role) = app
        .post(
            "/api/v1/roles",
            Some(&admin_token),
            json!({ "name": "Auditor", "description": "Reads the audit trail" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create role failed: {}", role);
    let role_id = role["id"].as_str().expect("role id");

    let (_, catalog) = app.get("/api/v1/permissions", &admin_token).await;
    let audit_read = catalog
        .as_array()
        .expect("permission list")
        .iter()
        .find(|p| p["name"] == "audit.read")
        .and_then(|p| p["id"].as_str())
        .expect("audit.read seeded")
        .to_string();

    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/api/v1/roles/{}", role_id),
            Some(&admin_token),
            Some(json!({ "permission_ids": [audit_read] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, assignment) = app
        .post(
            &format!("/api/v1/users/{}/roles/{}", user_id, role_id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["changed"], true);

    let (_, perms) = app.get("/api/v1/auth/me/permissions", &user_token).await;
    assert_eq!(perms["roles"], json!(["Auditor"]));
    assert_eq!(perms["permissions"], json!(["audit.read"]));

    let (status, _) = app.get("/api/v1/admin/audit-logs", &user_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn superuser_cannot_be_deactivated() {
    let app = TestApp::spawn().await;
    let admin_id = app.register("boss@example.com").await;
    app.make_admin(admin_id).await;
    let admin_token = app.access_token("boss@example.com").await;

    let root = app
        .state
        .services
        .accounts
        .ensure_superuser(
            "super@example.com",
            &identity_service::utils::Password::new(common::PASSWORD),
        )
        .await
        .expect("superuser");

    let (status, _) = app
        .post(
            &format!("/api/v1/users/{}/deactivate", root.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deactivated_account_loses_access() {
    let app = TestApp::spawn().await;
    let admin_id = app.register("ops@example.com").await;
    let user_id = app.register("kate@example.com").await;
    app.make_admin(admin_id).await;
    let admin_token = app.access_token("ops@example.com").await;
    let user_token = app.access_token("kate@example.com").await;

    let (status, account) = app
        .post(
            &format!("/api/v1/users/{}/deactivate", user_id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["is_active"], false);

    let (status, _) = app.get("/api/v1/auth/me", &user_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "kate@example.com", "password": common::PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn api_key_authenticates_and_can_be_revoked() {
    let app = TestApp::spawn().await;
    app.register("bot-owner@example.com").await;
    let token = app.access_token("bot-owner@example.com").await;

    let (status, created) = app
        .post(
            "/api/v1/api-keys",
            Some(&token),
            json!({ "name": "ci" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create key failed: {}", created);
    let key = created["key"].as_str().expect("plaintext key").to_string();
    let key_id = created["id"].as_str().expect("key id").to_string();
    assert!(key.starts_with("imk_"));

    let with_key = |key: String| {
        Request::builder()
            .uri("/api/v1/auth/me")
            .header("x-api-key", key)
            .body(Body::empty())
            .expect("request")
    };

    let response = app
        .router
        .clone()
        .oneshot(with_key(key.clone()))
        .await
        .expect("router");
    assert_eq!(response.status(), StatusCode::OK);

    let (status, listed) = app.get("/api/v1/api-keys", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed[0].get("key").is_none());
    assert!(listed[0].get("key_hash").is_none());

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/api-keys/{}", key_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let response = app
        .router
        .clone()
        .oneshot(with_key(key))
        .await
        .expect("router");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bogus = Request::builder()
        .uri("/api/v1/auth/me")
        .header(header::AUTHORIZATION, "Bearer imk_not-a-jwt")
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(bogus).await.expect("router");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

async fn call_with_key(
    app: &TestApp,
    method: Method,
    uri: &str,
    key: &str,
    body: Option<serde_json::Value>,
) -> StatusCode {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", key);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request");
    app.router
        .clone()
        .oneshot(request)
        .await
        .expect("router")
        .status()
}

#[tokio::test]
async fn scoped_key_cannot_manage_the_account() {
    let app = TestApp::spawn().await;
    let admin_id = app.register("keys@example.com").await;
    app.make_admin(admin_id).await;
    let token = app.access_token("keys@example.com").await;

    let (status, scoped) = app
        .post(
            "/api/v1/api-keys",
            Some(&token),
            json!({ "name": "reader", "scopes": ["users.read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create key failed: {}", scoped);
    let scoped_key = scoped["key"].as_str().expect("plaintext key").to_string();
    let scoped_id = scoped["id"].as_str().expect("key id").to_string();

    // Within its scopes the key works.
    let status = call_with_key(
        &app,
        Method::GET,
        &format!("/api/v1/users/{}", admin_id),
        &scoped_key,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let status = call_with_key(&app, Method::GET, "/api/v1/roles", &scoped_key, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // It cannot mint an unrestricted key for itself.
    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/api-keys",
        &scoped_key,
        Some(json!({ "name": "escalated" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = call_with_key(
        &app,
        Method::DELETE,
        &format!("/api/v1/api-keys/{}", scoped_id),
        &scoped_key,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/auth/change-password",
        &scoped_key,
        Some(json!({ "current_password": common::PASSWORD, "new_password": "N3w!Password" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/auth/logout-all",
        &scoped_key,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/auth/2fa/setup",
        &scoped_key,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/auth/2fa/disable",
        &scoped_key,
        Some(json!({ "password": common::PASSWORD, "code": "000000" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Nothing was created through the scoped key.
    let (_, listed) = app.get("/api/v1/api-keys", &token).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    // An unrestricted key still acts for its owner.
    let (_, full) = app
        .post("/api/v1/api-keys", Some(&token), json!({ "name": "full" }))
        .await;
    let full_key = full["key"].as_str().expect("plaintext key").to_string();
    let status = call_with_key(
        &app,
        Method::POST,
        "/api/v1/api-keys",
        &full_key,
        Some(json!({ "name": "child" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}
