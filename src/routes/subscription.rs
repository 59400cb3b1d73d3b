use axum::extract::State;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::db::operations::users::{self, Subscription};
use crate::middleware::auth::require_auth;
use crate::response::{ok, ok_with_message, AppError};
use crate::routes::db;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/payments/subscription/status", get(status))
        .route("/api/v1/payments/subscription", delete(cancel))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatusView {
    status: &'static str,
    plan: &'static str,
    current_period_end: Option<DateTime<Utc>>,
    is_premium: bool,
}

impl SubscriptionStatusView {
    fn new(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            status: subscription.status.as_str(),
            plan: subscription.plan.as_str(),
            current_period_end: subscription.current_period_end,
            is_premium: subscription.is_premium(now),
        }
    }
}

async fn status(Extension(user): Extension<AuthUser>) -> Response {
    ok(SubscriptionStatusView::new(&user.subscription, Utc::now())).into_response()
}

async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;

    let Some(subscription) = users::cancel_subscription(proxy.as_ref(), user.id).await?
    else {
        return Err(AppError::bad_request("No active subscription to cancel"));
    };

    tracing::info!(user_id = %user.id, plan = subscription.plan.as_str(), "subscription canceled");
    Ok(ok_with_message(
        SubscriptionStatusView::new(&subscription, Utc::now()),
        "Subscription canceled; access continues until the end of the billing period",
    )
    .into_response())
}
