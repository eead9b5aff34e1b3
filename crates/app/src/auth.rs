use std::sync::Arc;

use argon2::{
    password_hash::{
        rand_core::OsRng as PasswordRng, PasswordHash, PasswordHasher, PasswordVerifier,
        SaltString,
    },
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::task;
use uuid::Uuid;

use soderia_core::types::{Role, User};
use soderia_util::AuthConfig;

use crate::error::ApiError;
use crate::router::AppState;

type HmacSha256 = Hmac<Sha256>;

const ACCESS_COOKIE: &str = "access_token";
const REFRESH_SECRET_BYTES: usize = 32;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted refresh credential. Only `hash` is ever persisted.
#[derive(Debug, Clone)]
pub struct RefreshCredential {
    pub selector: String,
    pub token: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies access tokens and refresh credentials.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    refresh_key: Arc<[u8]>,
    access_ttl: ChronoDuration,
    refresh_ttl: ChronoDuration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            encoding_key: EncodingKey::from_secret(&config.jwt_secret),
            decoding_key: DecodingKey::from_secret(&config.jwt_secret),
            validation,
            refresh_key: Arc::from(config.jwt_secret.clone().into_boxed_slice()),
            access_ttl: to_chrono(config.access_token_ttl),
            refresh_ttl: to_chrono(config.refresh_token_ttl),
        }
    }

    pub fn access_ttl(&self) -> ChronoDuration {
        self.access_ttl
    }

    pub fn issue_access(&self, user: &User, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Sign(err.to_string()))
    }

    /// Decodes an access token and checks its expiry against `now`.
    pub fn validate_access(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?;
        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Invalid("token_expired".to_string()));
        }
        Ok(data.claims)
    }

    /// Creates a `<selector>.<secret>` refresh credential.
    pub fn mint_refresh(&self, now: DateTime<Utc>) -> Result<RefreshCredential, TokenError> {
        let mut secret = [0u8; REFRESH_SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);
        let secret = URL_SAFE_NO_PAD.encode(secret);
        let selector = Uuid::new_v4().to_string();
        Ok(RefreshCredential {
            token: format!("{selector}.{secret}"),
            hash: self.hash_secret(&secret)?,
            selector,
            expires_at: now + self.refresh_ttl,
        })
    }

    /// Compares a presented secret with a stored hash in constant time.
    pub fn verify_refresh(&self, secret: &str, stored_hash: &str) -> bool {
        let Ok(computed) = self.hash_secret(secret) else {
            return false;
        };
        computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
    }

    fn hash_secret(&self, secret: &str) -> Result<String, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.refresh_key)
            .map_err(|_| TokenError::Sign("failed to initialize credential hasher".to_string()))?;
        mac.update(secret.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

const MAX_TOKEN_TTL_DAYS: i64 = 36_500;

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    let cap = ChronoDuration::days(MAX_TOKEN_TTL_DAYS);
    ChronoDuration::from_std(duration).map_or(cap, |ttl| ttl.min(cap))
}

/// Splits a presented refresh credential into selector and secret.
pub fn split_refresh(token: &str) -> Option<(&str, &str)> {
    let (selector, secret) = token.split_once('.')?;
    if secret.is_empty() || Uuid::parse_str(selector).is_err() {
        return None;
    }
    Some((selector, secret))
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Sign(String),
}

/// Argon2 password hashing.
#[derive(Clone, Default)]
pub struct Passwords {
    argon2: Argon2<'static>,
}

impl Passwords {
    #[cfg(test)]
    pub fn fast() -> Self {
        let params = argon2::Params::new(argon2::Params::MIN_M_COST.max(8), 1, 1, None)
            .expect("valid argon2 params");
        Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        }
    }

    /// Hashes on the blocking pool so request workers keep serving.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut PasswordRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| PasswordError::Hash(err.to_string()))
        })
        .await?
    }

    /// Returns `false` for a wrong password as well as for an unparsable hash.
    pub async fn verify(&self, password: &str, hash: &str) -> bool {
        let argon2 = self.argon2.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        let verified = task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .map(|parsed| argon2.verify_password(password.as_bytes(), &parsed).is_ok())
                .unwrap_or(false)
        })
        .await;
        match verified {
            Ok(verified) => verified,
            Err(err) => {
                tracing::error!(stage = "auth", error = %err, "password verification task failed");
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("password hashing task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Any signed-in user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// A signed-in `ADMIN` or `MODERATOR`.
#[derive(Debug, Clone)]
pub struct StaffUser(pub AuthUser);

/// A signed-in `ADMIN`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("access token is required".to_string()))?;

        let claims = state
            .tokens()
            .validate_access(token, state.now())
            .map_err(|_| ApiError::Forbidden("access token is invalid or expired".to_string()))?;
        let id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| ApiError::Forbidden("access token is invalid or expired".to_string()))?;

        Ok(Self {
            id,
            username: claims.username,
            role: claims.role,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_staff() {
            return Err(ApiError::Forbidden("staff role required".to_string()));
        }
        Ok(Self(user))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(ApiError::Forbidden("admin role required".to_string()));
        }
        tracing::info!(stage = "auth", user_id = user.id, "admin request authorized");
        Ok(Self(user))
    }
}

/// Reads the access token from `Authorization: Bearer` or the `access_token` cookie.
fn access_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_COOKIE)
        .map(|(_, token)| token)
        .filter(|token| !token.is_empty())
}
