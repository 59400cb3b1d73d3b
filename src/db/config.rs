use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub primary_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub health_check_timeout: Duration,
    pub run_migrations: bool,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let primary_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(DbConfigError::Missing {
                key: "DATABASE_URL",
            })?;

        Ok(Self {
            primary_url,
            max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_millis(env_u64("DB_ACQUIRE_TIMEOUT_MS", 5000)),
            health_check_timeout: Duration::from_millis(env_u64("DB_HEALTH_CHECK_TIMEOUT_MS", 3000)),
            run_migrations: env_bool("DB_RUN_MIGRATIONS", true),
        })
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("missing required env {key}")]
    Missing { key: &'static str },
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
