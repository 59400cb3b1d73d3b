mod ai;
mod auth;
mod courses;
mod health;
mod instructor;
mod subscription;
mod users;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::DatabaseProxy;
use crate::middleware::rate_limit::{api_rate_limit_middleware, auth_rate_limit_middleware};
use crate::response::{json_error, AppError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .merge(auth::router(state.clone()))
        .merge(courses::router(state.clone()))
        .merge(instructor::router(state.clone()))
        .merge(users::router(state.clone()))
        .merge(ai::router(state.clone()))
        .merge(subscription::router(state.clone()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_middleware,
        ))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found").into_response()
}

pub(crate) fn db(state: &AppState) -> Result<Arc<DatabaseProxy>, AppError> {
    state
        .db_proxy()
        .ok_or_else(|| AppError::service_unavailable("Database unavailable"))
}

/// Unwraps a JSON body, turning extractor rejections into the API error shape.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::validation(format!("Invalid {what} id")))
}

pub(crate) fn require_instructor(user: &AuthUser) -> Result<(), AppError> {
    if user.role.can_author() {
        Ok(())
    } else {
        Err(AppError::forbidden("Instructor access required"))
    }
}

pub(crate) fn require_premium(user: &AuthUser) -> Result<(), AppError> {
    if user.subscription.is_premium(Utc::now()) {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            "SUBSCRIPTION_REQUIRED",
            "An active Hero or Guild subscription is required",
        ))
    }
}
