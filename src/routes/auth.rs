use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthUser};
use crate::db::operations::users::{self, NewUser, User};
use crate::db::DatabaseProxy;
use crate::middleware::auth::require_auth;
use crate::response::{json_error, ok, ok_with_message, AppError, SuccessResponse};
use crate::routes::{body, db};
use crate::state::AppState;

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_NAME_CHARS: usize = 50;

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .merge(protected)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthData {
    user: User,
    token: String,
}

fn validate_name(raw: &str, field: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::validation(format!(
            "{field} must be between 1 and {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = body(payload)?;

    let email = payload.email.trim().to_lowercase();
    if !auth::is_valid_email(&email) {
        return Err(AppError::validation("Please provide a valid email"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    let first_name = validate_name(&payload.first_name, "First name")?;
    let last_name = validate_name(&payload.last_name, "Last name")?;

    let proxy = db(&state)?;

    let password_hash = auth::hash_password(&payload.password).map_err(|err| {
        tracing::warn!(error = %err, "password hash failed");
        AppError::internal(err.to_string())
    })?;

    let new_user = NewUser {
        email,
        password_hash,
        first_name,
        last_name,
    };
    let Some(user) = users::insert_user(proxy.as_ref(), &new_user).await? else {
        return Err(AppError::conflict("An account with this email already exists"));
    };

    tracing::info!(user_id = %user.id, "user registered");
    session_response(proxy.as_ref(), user, StatusCode::CREATED).await
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = body(payload)?;

    let email = payload.email.trim().to_lowercase();
    if !auth::is_valid_email(&email) || payload.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }

    let proxy = db(&state)?;

    let user = users::find_by_email(proxy.as_ref(), &email).await?;
    let Some(user) = user.filter(|user| auth::verify_password(&payload.password, &user.password_hash))
    else {
        return Err(AppError::unauthorized("Invalid email or password"));
    };

    if !user.is_active {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "ACCOUNT_DEACTIVATED",
            "This account has been deactivated",
        ));
    }

    session_response(proxy.as_ref(), user, StatusCode::OK).await
}

async fn session_response(
    proxy: &DatabaseProxy,
    user: User,
    status: StatusCode,
) -> Result<Response, AppError> {
    let (token, expires_at) = auth::sign_jwt_for_user(user.id).map_err(|err| {
        tracing::warn!(error = %err, "jwt sign failed");
        AppError::internal(err.to_string())
    })?;

    users::insert_session(proxy, user.id, &auth::hash_token(&token), expires_at).await?;

    let mut headers = HeaderMap::new();
    if let Some(cookie) = auth::auth_cookie_header(&token) {
        headers.insert(header::SET_COOKIE, cookie);
    }

    Ok((status, headers, ok(AuthData { user, token })).into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let proxy = db(&state)?;

    if let Some(token) = auth::extract_token(&headers) {
        users::delete_session(proxy.as_ref(), &auth::hash_token(&token)).await?;
    }

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = auth::clear_auth_cookie_header() {
        response_headers.insert(header::SET_COOKIE, cookie);
    }

    Ok((response_headers, ok_with_message((), "Logged out")).into_response())
}

async fn me(Extension(user): Extension<AuthUser>) -> Json<SuccessResponse<AuthUser>> {
    ok(user)
}
