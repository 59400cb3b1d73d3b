use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::Config;
use crate::db::DatabaseProxy;
use crate::middleware::rate_limit::RateLimiters;
use crate::services::llm_provider::ContentGenerator;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    config: Arc<Config>,
    db_proxy: Option<Arc<DatabaseProxy>>,
    generator: Arc<dyn ContentGenerator>,
    rate_limiters: RateLimiters,
}

impl AppState {
    pub fn new(
        config: Config,
        db_proxy: Option<Arc<DatabaseProxy>>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            config: Arc::new(config),
            db_proxy,
            generator,
            rate_limiters: RateLimiters::default(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn generator(&self) -> Arc<dyn ContentGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.rate_limiters
    }
}
