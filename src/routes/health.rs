use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::db::DbHealth;
use crate::state::AppState;

const SERVICE_NAME: &str = "academy-backend";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/info", get(info))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn root(State(state): State<AppState>) -> Response {
    let db_status = database_check(&state).await;
    let ok = matches!(db_status, DbHealth::Connected { .. });

    let response = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        database: database_label(db_status),
        timestamp: now_iso(),
    };

    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let response = HealthInfoResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        environment: std::env::var("NODE_ENV")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "development".to_string()),
        start_time: system_time_iso(state.started_at_system()),
        uptime: state.uptime_seconds(),
        ai_provider: state.generator().provider_info().name,
    };

    Json(response).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let db_status = database_check(&state).await;

    let (status, latency_ms) = match db_status {
        DbHealth::Connected { latency } => ("healthy", Some(latency.as_millis() as u64)),
        DbHealth::Timeout => ("degraded", None),
        DbHealth::Disconnected => ("unhealthy", None),
    };

    let response = ReadinessResponse {
        status,
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
        checks: ReadinessChecks {
            database: database_label(db_status),
            database_latency: latency_ms,
            ai_provider: state.generator().is_available(),
        },
    };

    let status_code = match status {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response)).into_response()
}

async fn database_check(state: &AppState) -> DbHealth {
    match state.db_proxy() {
        Some(proxy) => proxy.check_health().await,
        None => DbHealth::Disconnected,
    }
}

fn database_label(status: DbHealth) -> &'static str {
    match status {
        DbHealth::Connected { .. } => "connected",
        DbHealth::Timeout => "timeout",
        DbHealth::Disconnected => "disconnected",
    }
}

fn system_time_iso(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthInfoResponse {
    service: &'static str,
    version: &'static str,
    environment: String,
    start_time: String,
    uptime: u64,
    ai_provider: String,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    checks: ReadinessChecks,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessChecks {
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_latency: Option<u64>,
    ai_provider: bool,
}
