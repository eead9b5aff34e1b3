use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};

use soderia_core::types::User;
use soderia_core::validate;
use soderia_storage::{NewRefreshToken, NewUser};

use crate::auth::split_refresh;
use crate::error::{ApiError, ApiJson};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

/// Access/refresh pair returned by every successful sign-in.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_in: i64,
}

struct SessionIssued {
    pair: TokenPair,
    status: StatusCode,
}

impl IntoResponse for SessionIssued {
    fn into_response(self) -> Response {
        let cookie = format!(
            "access_token={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.pair.access_token, self.pair.expires_in
        );
        let mut response = (self.status, Json(self.pair)).into_response();
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        response
    }
}

fn record(op: &'static str, result: &'static str) {
    counter!("auth_sessions_total", "op" => op, "result" => result).increment(1);
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.unwrap_or_default();
    let username = validate::credentials(body.username.as_deref().unwrap_or_default(), &password)?;

    let password_hash = state
        .passwords()
        .hash(&password)
        .await
        .map_err(ApiError::server)?;

    let now = state.now();
    let mut tx = state.storage().begin().await?;
    let user = match state
        .storage()
        .users()
        .create(
            &mut tx,
            &NewUser {
                username: &username,
                password_hash: &password_hash,
                created_at: now,
            },
        )
        .await
    {
        Ok(user) => user,
        Err(err) => {
            record("register", "rejected");
            return Err(err.into());
        }
    };
    let pair = issue_pair(&state, &mut tx, &user).await?;
    tx.commit().await?;

    record("register", "ok");
    info!(stage = "auth", user_id = user.id, role = %user.role, "user registered");
    Ok(SessionIssued {
        pair,
        status: StatusCode::CREATED,
    })
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(username), Some(password)) = (
        body.username.filter(|value| !value.is_empty()),
        body.password.filter(|value| !value.is_empty()),
    ) else {
        return Err(ApiError::invalid_input("username and password are required"));
    };

    let credentials = state
        .storage()
        .users()
        .fetch_credentials(username.trim())
        .await?;
    let verified = match credentials {
        Some(stored) => state
            .passwords()
            .verify(&password, &stored.password_hash)
            .await
            .then_some(stored),
        None => None,
    };
    let Some(credentials) = verified else {
        record("login", "rejected");
        warn!(stage = "auth", "login rejected");
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    };

    let mut tx = state.storage().begin().await?;
    let pair = issue_pair(&state, &mut tx, &credentials.user).await?;
    tx.commit().await?;

    record("login", "ok");
    info!(stage = "auth", user_id = credentials.user.id, "user signed in");
    Ok(SessionIssued {
        pair,
        status: StatusCode::OK,
    })
}

/// Exchanges a refresh credential for a new pair. The presented credential is consumed.
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let presented = body
        .refresh_token
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("refresh token is required".to_string()))?;
    let rejected = || {
        record("refresh", "rejected");
        ApiError::Forbidden("refresh token is invalid or expired".to_string())
    };

    let (selector, secret) = split_refresh(&presented).ok_or_else(rejected)?;

    let now = state.now();
    let repo = state.storage().refresh_tokens();
    let mut tx = state.storage().begin().await?;
    // A mismatching secret drops the transaction, which restores the row.
    let stored = repo
        .take_active(&mut tx, selector, now)
        .await?
        .filter(|stored| state.tokens().verify_refresh(secret, &stored.token_hash))
        .ok_or_else(rejected)?;

    let user = state
        .storage()
        .users()
        .fetch_in(&mut tx, stored.user_id)
        .await?
        .ok_or_else(rejected)?;
    let pair = issue_pair(&state, &mut tx, &user).await?;
    tx.commit().await?;

    record("refresh", "ok");
    info!(stage = "auth", user_id = user.id, "refresh token rotated");
    Ok(SessionIssued {
        pair,
        status: StatusCode::OK,
    })
}

pub async fn logout(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    let presented = body
        .refresh_token
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("refresh token is required".to_string()))?;
    let not_found = || ApiError::not_found("refresh token not found");

    let (selector, secret) = split_refresh(&presented).ok_or_else(not_found)?;

    let repo = state.storage().refresh_tokens();
    let mut tx = state.storage().begin().await?;
    let stored = repo
        .take_active(&mut tx, selector, state.now())
        .await?
        .filter(|stored| state.tokens().verify_refresh(secret, &stored.token_hash))
        .ok_or_else(not_found)?;
    tx.commit().await?;

    record("logout", "ok");
    info!(stage = "auth", user_id = stored.user_id, "user signed out");
    Ok(StatusCode::NO_CONTENT)
}

async fn issue_pair(
    state: &AppState,
    tx: &mut Transaction<'_, Sqlite>,
    user: &User,
) -> Result<TokenPair, ApiError> {
    let now = state.now();
    let access_token = state
        .tokens()
        .issue_access(user, now)
        .map_err(ApiError::server)?;
    let credential = state.tokens().mint_refresh(now).map_err(ApiError::server)?;

    state
        .storage()
        .refresh_tokens()
        .insert(
            tx,
            &NewRefreshToken {
                id: &credential.selector,
                user_id: user.id,
                token_hash: &credential.hash,
                expires_at: credential.expires_at,
                created_at: now,
            },
        )
        .await?;

    Ok(TokenPair {
        access_token,
        refresh_token: credential.token,
        token_type: "Bearer",
        expires_in: state.tokens().access_ttl().num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    use crate::router::app_router;
    use crate::testing::{read_json, send_json, setup_state};

    async fn register_user(app: &axum::Router, username: &str) -> Value {
        let (status, body) = send_json(
            app,
            "POST",
            "/auth/register",
            None,
            json!({ "username": username, "password": "secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn register_returns_pair_and_first_user_is_admin() {
        let state = setup_state().await;
        let app = app_router(state.clone());

        let body = register_user(&app, "owner").await;
        let access = body["access_token"].as_str().expect("access token");
        assert!(body["refresh_token"].as_str().expect("refresh").contains('.'));
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 900);

        let claims = state
            .tokens()
            .validate_access(access, state.now())
            .expect("valid token");
        assert_eq!(claims.role, soderia_core::types::Role::Admin);

        let body = register_user(&app, "clerk").await;
        let claims = state
            .tokens()
            .validate_access(body["access_token"].as_str().expect("token"), state.now())
            .expect("valid token");
        assert_eq!(claims.role, soderia_core::types::Role::User);
    }

    #[tokio::test]
    async fn register_validates_and_rejects_duplicates() {
        let app = app_router(setup_state().await);

        let (status, body) = send_json(
            &app,
            "POST",
            "/auth/register",
            None,
            json!({ "username": "  ", "password": "secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_input");

        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/register",
            None,
            json!({ "username": "maria", "password": "12345" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        register_user(&app, "maria").await;
        let (status, body) = send_json(
            &app,
            "POST",
            "/auth/register",
            None,
            json!({ "username": "maria", "password": "secret2" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "conflict");
    }

    #[tokio::test]
    async fn login_checks_credentials() {
        let app = app_router(setup_state().await);
        register_user(&app, "maria").await;

        let (status, _) = send_json(&app, "POST", "/auth/login", None, json!({ "username": "maria" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/login",
            None,
            json!({ "username": "maria", "password": "wrong-one" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/login",
            None,
            json!({ "username": "nobody", "password": "secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "username": "maria", "password": "secret1" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("cookie")
            .to_string();
        assert!(cookie.starts_with("access_token="));
        assert!(cookie.contains("HttpOnly"));
        let body = read_json(response).await;
        assert!(body["access_token"].is_string());
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_reuse() {
        let app = app_router(setup_state().await);
        let body = register_user(&app, "maria").await;
        let first = body["refresh_token"].as_str().expect("refresh").to_string();

        let (status, rotated) =
            send_json(&app, "POST", "/auth/refresh", None, json!({ "refresh_token": first })).await;
        assert_eq!(status, StatusCode::OK);
        let second = rotated["refresh_token"].as_str().expect("refresh").to_string();
        assert_ne!(first, second);

        let (status, body) =
            send_json(&app, "POST", "/auth/refresh", None, json!({ "refresh_token": first })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["type"], "forbidden");

        let (status, _) =
            send_json(&app, "POST", "/auth/refresh", None, json!({ "refreshToken": second })).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_rejects_missing_malformed_and_expired_tokens() {
        let now = Utc::now();
        let current = Arc::new(Mutex::new(now));
        let clock_source = current.clone();
        let state = setup_state()
            .await
            .with_clock(Arc::new(move || *clock_source.lock().expect("clock")));
        let app = app_router(state);

        let (status, _) = send_json(&app, "POST", "/auth/refresh", None, json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/refresh",
            None,
            json!({ "refresh_token": "garbage" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let body = register_user(&app, "maria").await;
        let token = body["refresh_token"].as_str().expect("refresh").to_string();
        let (selector, _) = split_refresh(&token).expect("well formed");
        let (status, _) = send_json(
            &app,
            "POST",
            "/auth/refresh",
            None,
            json!({ "refresh_token": format!("{selector}.tampered-secret") }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        *current.lock().expect("clock") = now + ChronoDuration::days(8);
        let (status, _) =
            send_json(&app, "POST", "/auth/refresh", None, json!({ "refresh_token": token })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let app = app_router(setup_state().await);
        let body = register_user(&app, "maria").await;
        let token = body["refresh_token"].as_str().expect("refresh").to_string();

        let (status, _) = send_json(&app, "POST", "/auth/logout", None, json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            send_json(&app, "POST", "/auth/logout", None, json!({ "refresh_token": token })).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            send_json(&app, "POST", "/auth/logout", None, json!({ "refresh_token": token })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            send_json(&app, "POST", "/auth/refresh", None, json!({ "refresh_token": token })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
