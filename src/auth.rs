use axum::http::{header, HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::users::{self, Role, Subscription, User};
use crate::db::DatabaseProxy;

pub const AUTH_COOKIE_NAME: &str = "access_token";
const DEFAULT_EXPIRES_IN: &str = "24h";
const BCRYPT_COST: u32 = 10;

type HmacSha256 = Hmac<Sha256>;

/// The authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub subscription: Subscription,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            first_name: user.profile.first_name.clone(),
            last_name: user.profile.last_name.clone(),
            subscription: user.subscription.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing JWT_SECRET")]
    MissingSecret,
    #[error("invalid JWT_EXPIRES_IN")]
    InvalidExpiresIn,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = get_cookie(headers, AUTH_COOKIE_NAME) {
        return Some(token);
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolves a bearer token to its active user through the session table.
pub async fn authenticate(proxy: &DatabaseProxy, token: &str) -> Result<AuthUser, AuthError> {
    let secret = jwt_secret()?;
    let now = Utc::now();
    let claims = verify_jwt_hs256(token, &secret, now)?;

    let user = users::find_session_user(proxy, &hash_token(token), now)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if user.id != claims.user_id {
        tracing::warn!(user_id = %user.id, "session owner does not match token subject");
        return Err(AuthError::InvalidToken);
    }

    Ok(AuthUser::from(&user))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtClaims {
    pub user_id: Uuid,
}

pub fn verify_jwt_hs256(token: &str, secret: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let sig_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;

    let header_json: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::InvalidToken)?;
    if header_json.get("alg").and_then(|value| value.as_str()) != Some("HS256") {
        return Err(AuthError::InvalidToken);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidToken)?;

    validate_registered_claims(&payload_json, now)?;

    let user_id = payload_json
        .get("userId")
        .and_then(|value| value.as_str())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or(AuthError::InvalidToken)?;

    Ok(JwtClaims { user_id })
}

fn validate_registered_claims(payload: &serde_json::Value, now: DateTime<Utc>) -> Result<(), AuthError> {
    let now = now.timestamp();

    if let Some(exp) = payload.get("exp").and_then(|value| value.as_i64()) {
        if now >= exp {
            return Err(AuthError::InvalidToken);
        }
    }

    if let Some(nbf) = payload.get("nbf").and_then(|value| value.as_i64()) {
        if now < nbf {
            return Err(AuthError::InvalidToken);
        }
    }

    Ok(())
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signs a token with `JWT_SECRET` and `JWT_EXPIRES_IN`, returning it with its expiry.
pub fn sign_jwt_for_user(user_id: Uuid) -> Result<(String, DateTime<Utc>), AuthError> {
    let secret = jwt_secret()?;
    let expires_in_ms = parse_expires_in_ms(&expires_in())?;
    sign_jwt(user_id, &secret, expires_in_ms, Utc::now())
}

pub fn sign_jwt(
    user_id: Uuid,
    secret: &str,
    expires_in_ms: i64,
    issued_at: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), AuthError> {
    let exp = issued_at
        .checked_add_signed(Duration::milliseconds(expires_in_ms))
        .ok_or(AuthError::InvalidExpiresIn)?;

    let header_json = serde_json::json!({
        "alg": "HS256",
        "typ": "JWT",
    });

    let payload_json = serde_json::json!({
        "userId": user_id.to_string(),
        "iat": issued_at.timestamp(),
        "exp": exp.timestamp(),
    });

    let header_b64 = URL_SAFE_NO_PAD.encode(header_json.to_string());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.to_string());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok((format!("{signing_input}.{sig_b64}"), exp))
}

pub fn parse_expires_in_ms(value: &str) -> Result<i64, AuthError> {
    let trimmed = value.trim();
    if trimmed.len() < 2 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);

    let amount: i64 = digits.parse().map_err(|_| AuthError::InvalidExpiresIn)?;
    if amount <= 0 {
        return Err(AuthError::InvalidExpiresIn);
    }

    let unit_ms = match unit {
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        "d" => 24 * 60 * 60 * 1000,
        _ => return Err(AuthError::InvalidExpiresIn),
    };
    amount.checked_mul(unit_ms).ok_or(AuthError::InvalidExpiresIn)
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

pub fn is_valid_email(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.contains(' ') {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

pub fn auth_cookie_header(token: &str) -> Option<HeaderValue> {
    let max_age = parse_expires_in_ms(&expires_in())
        .map(|ms| ms / 1000)
        .unwrap_or(86400);

    let mut cookie =
        format!("{AUTH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if is_production() {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie).ok()
}

pub fn clear_auth_cookie_header() -> Option<HeaderValue> {
    let mut cookie = format!(
        "{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0"
    );
    if is_production() {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie).ok()
}

fn jwt_secret() -> Result<String, AuthError> {
    std::env::var("JWT_SECRET")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(AuthError::MissingSecret)
}

fn expires_in() -> String {
    std::env::var("JWT_EXPIRES_IN").unwrap_or_else(|_| DEFAULT_EXPIRES_IN.to_string())
}

fn is_production() -> bool {
    std::env::var("NODE_ENV")
        .map(|value| value == "production")
        .unwrap_or(false)
}

fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
