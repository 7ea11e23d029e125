mod common;

use axum::http::StatusCode;
use common::{TestApp, PASSWORD};
use serde_json::{json, Value};
use totp_rs::{Algorithm, Secret, TOTP};

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .expect("base32 secret");
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        None,
        "test-account".to_string(),
    )
    .expect("valid totp")
    .generate_current()
    .expect("system clock")
}

async fn enroll(app: &TestApp, email: &str) -> (String, Vec<String>) {
    app.register(email).await;
    let access = app.access_token(email).await;

    let (status, setup) = app
        .request(
            axum::http::Method::POST,
            "/api/v1/auth/2fa/setup",
            Some(&access),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "setup failed: {}", setup);
    let secret = setup["secret"].as_str().expect("secret").to_string();
    assert!(setup["provisioning_uri"]
        .as_str()
        .is_some_and(|uri| uri.starts_with("otpauth://totp/")));
    let backup_codes: Vec<String> = setup["backup_codes"]
        .as_array()
        .expect("backup codes")
        .iter()
        .filter_map(|c| c.as_str().map(str::to_string))
        .collect();

    let (status, _) = app
        .post(
            "/api/v1/auth/2fa/verify",
            Some(&access),
            json!({ "code": "000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/v1/auth/2fa/verify",
            Some(&access),
            json!({ "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    (secret, backup_codes)
}

async fn password_step(app: &TestApp, email: &str) -> Value {
    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": email, "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn enabled_two_factor_gates_login() {
    let app = TestApp::spawn().await;
    let (secret, _) = enroll(&app, "grace@example.com").await;

    let challenge = password_step(&app, "grace@example.com").await;
    assert_eq!(challenge["requires_2fa"], true);
    assert!(challenge.get("access_token").is_none());
    let challenge_token = challenge["challenge_token"]
        .as_str()
        .expect("challenge token");

    // The challenge cannot be used as an access token.
    let (status, _) = app.get("/api/v1/auth/me", challenge_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/v1/auth/login/2fa",
            None,
            json!({ "challenge_token": challenge_token, "code": "000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, tokens) = app
        .post(
            "/api/v1/auth/login/2fa",
            None,
            json!({ "challenge_token": challenge_token, "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = tokens["access_token"].as_str().expect("access token");

    let (status, me) = app.get("/api/v1/auth/me", access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["is_2fa_enabled"], true);
}

#[tokio::test]
async fn backup_codes_work_once() {
    let app = TestApp::spawn().await;
    let (_, backup_codes) = enroll(&app, "heidi@example.com").await;
    let code = backup_codes.first().expect("at least one backup code");

    let challenge = password_step(&app, "heidi@example.com").await;
    let (status, _) = app
        .post(
            "/api/v1/auth/login/2fa",
            None,
            json!({ "challenge_token": challenge["challenge_token"], "code": code }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let challenge = password_step(&app, "heidi@example.com").await;
    let (status, _) = app
        .post(
            "/api/v1/auth/login/2fa",
            None,
            json!({ "challenge_token": challenge["challenge_token"], "code": code }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disable_requires_password_and_code() {
    let app = TestApp::spawn().await;
    let (secret, _) = enroll(&app, "ivan@example.com").await;

    let challenge = password_step(&app, "ivan@example.com").await;
    let (_, tokens) = app
        .post(
            "/api/v1/auth/login/2fa",
            None,
            json!({
                "challenge_token": challenge["challenge_token"],
                "code": current_code(&secret),
            }),
        )
        .await;
    let access = tokens["access_token"].as_str().expect("access token");

    let (status, _) = app
        .post(
            "/api/v1/auth/2fa/disable",
            Some(access),
            json!({ "password": "Wr0ng!Pass", "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/api/v1/auth/2fa/disable",
            Some(access),
            json!({ "password": PASSWORD, "code": current_code(&secret) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let body = password_step(&app, "ivan@example.com").await;
    assert!(body["access_token"].is_string());
}
