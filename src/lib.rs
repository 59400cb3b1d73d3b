pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::services::llm_provider::OpenAiGenerator;
use crate::state::AppState;

pub async fn create_app() -> axum::Router {
    let config = Config::from_env();

    let db_proxy = match db::DatabaseProxy::from_env().await {
        Ok(proxy) => Some(proxy),
        Err(err) => {
            tracing::warn!(error = %err, "database proxy not initialized");
            None
        }
    };

    let generator = Arc::new(OpenAiGenerator::from_env());
    build_router(AppState::new(config, db_proxy, generator))
}

pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
