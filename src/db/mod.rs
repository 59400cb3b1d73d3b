pub mod config;
pub mod migrate;
pub mod operations;

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::config::{DbConfig, DbConfigError};
use crate::db::migrate::MigrationError;

#[derive(Clone)]
pub struct DatabaseProxy {
    config: DbConfig,
    pool: PgPool,
}

#[derive(Debug, Clone, Copy)]
pub enum DbHealth {
    Connected { latency: Duration },
    Timeout,
    Disconnected,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let config = DbConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.primary_url)
            .await
            .map_err(DbInitError::Sqlx)?;

        if config.run_migrations {
            migrate::run_migrations(&pool).await?;
        }

        Ok(Arc::new(Self { config, pool }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn check_health(&self) -> DbHealth {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.health_check_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await;

        match result {
            Ok(Ok(_)) => DbHealth::Connected {
                latency: started.elapsed(),
            },
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "database health check failed");
                DbHealth::Disconnected
            }
            Err(_) => DbHealth::Timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
