use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use soderia_storage::Database;
use soderia_util::AuthConfig;

use crate::auth::Passwords;
use crate::router::AppState;
use crate::telemetry;

pub const TEST_PASSWORD: &str = "secret1";

pub async fn setup_state() -> AppState {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");

    let auth = AuthConfig {
        jwt_secret: b"test-jwt-secret".to_vec(),
        access_token_ttl: Duration::from_secs(900),
        refresh_token_ttl: Duration::from_secs(604_800),
    };
    AppState::new(metrics, database, &auth).with_passwords(Passwords::fast())
}

/// Sends a request with an optional bearer token. A `null` body is sent empty.
pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = if body.is_null() {
        builder.body(Body::empty())
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    (status, read_json(response).await)
}

pub async fn read_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

/// Registers `username` and returns its access token.
pub async fn sign_in(app: &Router, username: &str) -> String {
    let (status, body) = send_json(
        app,
        "POST",
        "/auth/register",
        None,
        json!({ "username": username, "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register {username}: {body}");
    body["access_token"].as_str().expect("access token").to_string()
}

/// Logs an already registered user in again and returns a fresh access token.
pub async fn log_in(app: &Router, username: &str) -> String {
    let (status, body) = send_json(
        app,
        "POST",
        "/auth/login",
        None,
        json!({ "username": username, "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login {username}: {body}");
    body["access_token"].as_str().expect("access token").to_string()
}
