use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::AuthError;
use crate::response::json_error;
use crate::state::AppState;

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = crate::auth::extract_token(req.headers()) else {
        return json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Authentication required")
            .into_response();
    };

    let Some(proxy) = state.db_proxy() else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unavailable",
        )
        .into_response();
    };

    match crate::auth::authenticate(proxy.as_ref(), &token).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(AuthError::Database(err)) => {
            tracing::error!(error = %err, "session lookup failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
            .into_response()
        }
        Err(err) => {
            tracing::debug!(error = %err, "rejected token");
            json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid or expired session",
            )
            .into_response()
        }
    }
}

/// Attaches the caller when a valid token is present; never rejects.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = crate::auth::extract_token(req.headers()) else {
        return next.run(req).await;
    };

    let Some(proxy) = state.db_proxy() else {
        return next.run(req).await;
    };

    if let Ok(user) = crate::auth::authenticate(proxy.as_ref(), &token).await {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}
