use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::{self, AuthUser};
use crate::db::operations::badges::{self, EarnedBadge};
use crate::db::operations::enrollments::{self, EnrollmentStatus, EnrollmentWithCourse};
use crate::db::operations::users::{self, Gamification, PreferencesUpdate, ProfileUpdate, User};
use crate::db::DatabaseProxy;
use crate::middleware::auth::require_auth;
use crate::response::{ok, ok_with_message, AppError};
use crate::routes::{body, db};
use crate::services::dashboard::{self, CertificateEntry, ProgressStats};
use crate::state::AppState;

const RECENT_ACHIEVEMENTS: i64 = 5;
const MAX_NAME_CHARS: usize = 50;
const MAX_BIO_CHARS: usize = 500;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/users/profile", get(profile).patch(update_profile))
        .route("/api/v1/users/preferences", patch(update_preferences))
        .route("/api/v1/users/enrollments", get(list_enrollments))
        .route("/api/v1/users/progress", get(progress))
        .route("/api/v1/users/certificates", get(certificates))
        .route("/api/v1/users/badges", get(list_badges))
        .route("/api/v1/users/dashboard", get(dashboard))
        .route("/api/v1/users/account", delete(delete_account))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

async fn load_user(proxy: &DatabaseProxy, user: &AuthUser) -> Result<User, AppError> {
    users::find_by_id(proxy, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    Ok(ok(load_user(proxy.as_ref(), &user).await?).into_response())
}

fn validate_profile_update(update: &ProfileUpdate) -> Result<(), AppError> {
    for (value, field) in [
        (&update.first_name, "First name"),
        (&update.last_name, "Last name"),
    ] {
        if let Some(value) = value {
            let len = value.trim().chars().count();
            if len == 0 || len > MAX_NAME_CHARS {
                return Err(AppError::validation(format!(
                    "{field} must be between 1 and {MAX_NAME_CHARS} characters"
                )));
            }
        }
    }
    if update
        .bio
        .as_ref()
        .is_some_and(|bio| bio.chars().count() > MAX_BIO_CHARS)
    {
        return Err(AppError::validation(format!(
            "Bio is limited to {MAX_BIO_CHARS} characters"
        )));
    }
    Ok(())
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Response, AppError> {
    let update = body(payload)?;
    validate_profile_update(&update)?;
    let proxy = db(&state)?;

    let updated = users::update_profile(proxy.as_ref(), user.id, &update)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ok_with_message(updated, "Profile updated").into_response())
}

async fn update_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<PreferencesUpdate>, JsonRejection>,
) -> Result<Response, AppError> {
    let update = body(payload)?;
    let proxy = db(&state)?;

    let updated = users::update_preferences(proxy.as_ref(), user.id, &update)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ok_with_message(updated.preferences, "Preferences updated").into_response())
}

#[derive(Debug, Deserialize)]
struct EnrollmentQuery {
    status: Option<String>,
}

async fn list_enrollments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<EnrollmentQuery>,
) -> Result<Response, AppError> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(EnrollmentStatus::parse(raw).ok_or_else(|| {
            AppError::validation("status must be one of active, completed, expired")
        })?),
        None => None,
    };
    let proxy = db(&state)?;

    let items = enrollments::list_for_user(proxy.as_ref(), user.id, status).await?;
    Ok(ok(items).into_response())
}

#[derive(Serialize)]
struct ProgressOverview {
    gamification: Gamification,
    stats: ProgressStats,
}

async fn progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let record = load_user(proxy.as_ref(), &user).await?;
    let items = enrollments::list_for_user(proxy.as_ref(), user.id, None).await?;

    Ok(ok(ProgressOverview {
        gamification: record.gamification,
        stats: dashboard::progress_stats(&items),
    })
    .into_response())
}

async fn certificates(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let items: Vec<EnrollmentWithCourse> =
        enrollments::list_for_user(proxy.as_ref(), user.id, Some(EnrollmentStatus::Completed)).await?;
    let entries: Vec<CertificateEntry> = dashboard::certificates(&items);
    Ok(ok(entries).into_response())
}

#[derive(Serialize)]
struct BadgeList {
    badges: Vec<EarnedBadge>,
    total: usize,
}

async fn list_badges(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let earned = badges::list_earned(proxy.as_ref(), user.id, None).await?;
    Ok(ok(BadgeList {
        total: earned.len(),
        badges: earned,
    })
    .into_response())
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let record = load_user(proxy.as_ref(), &user).await?;
    let items = enrollments::list_for_user(proxy.as_ref(), user.id, None).await?;
    let recent = badges::list_earned(proxy.as_ref(), user.id, Some(RECENT_ACHIEVEMENTS)).await?;
    let total_badges = badges::count_earned(proxy.as_ref(), user.id).await?;

    let view = dashboard::build_dashboard(&record, &items, recent, total_badges, Utc::now());
    Ok(ok(view).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteAccountRequest {
    password: String,
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<DeleteAccountRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = body(payload)?;
    if payload.password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }
    let proxy = db(&state)?;
    let record = load_user(proxy.as_ref(), &user).await?;

    if !auth::verify_password(&payload.password, &record.password_hash) {
        return Err(AppError::unauthorized("Incorrect password"));
    }

    users::soft_delete(proxy.as_ref(), user.id).await?;
    tracing::info!(user_id = %user.id, "account deactivated");

    let mut headers = HeaderMap::new();
    if let Some(cookie) = auth::clear_auth_cookie_header() {
        headers.insert(header::SET_COOKIE, cookie);
    }
    Ok((headers, ok_with_message((), "Account deleted")).into_response())
}
