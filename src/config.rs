use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_AI_DAILY_LIMIT: i32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub ai_daily_limit: i32,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let ai_daily_limit = std::env::var("AI_DAILY_LIMIT")
            .ok()
            .and_then(|value| value.trim().parse::<i32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_AI_DAILY_LIMIT);

        Self {
            host,
            port,
            log_level,
            ai_daily_limit,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
            log_level: "info".to_string(),
            ai_daily_limit: DEFAULT_AI_DAILY_LIMIT,
        }
    }
}

pub fn is_test_env() -> bool {
    ["APP_ENV", "NODE_ENV"]
        .iter()
        .any(|key| matches!(std::env::var(key).ok().as_deref(), Some("test")))
}
