use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header::RETRY_AFTER, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::config::is_test_env;
use crate::response::json_error;
use crate::state::AppState;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

const DEFAULT_API_WINDOW_MS: u64 = 15 * 60 * 1000;
const DEFAULT_API_MAX: u64 = 100;

const AUTH_WINDOW_MS: u64 = 15 * 60 * 1000;
const AUTH_MAX: u64 = 20;

/// One fixed-window limiter for the API as a whole and a stricter one for auth.
#[derive(Clone)]
pub struct RateLimiters {
    api: Arc<RateLimiter>,
    auth: Arc<RateLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self {
            api: Arc::new(RateLimiter::new(api_config())),
            auth: Arc::new(RateLimiter::new(RateLimitConfig {
                window_ms: AUTH_WINDOW_MS,
                max: AUTH_MAX,
            })),
        }
    }
}

pub async fn api_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !matches_api_prefix(req.uri().path()) || should_skip(&req) {
        return next.run(req).await;
    }

    enforce_rate_limit(
        &state.rate_limiters().api,
        Scope::Api,
        req,
        next,
        "TOO_MANY_REQUESTS",
        "Too many requests, please try again later",
    )
    .await
}

pub async fn auth_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !req.uri().path().starts_with("/api/v1/auth") || should_skip(&req) {
        return next.run(req).await;
    }

    enforce_rate_limit(
        &state.rate_limiters().auth,
        Scope::Auth,
        req,
        next,
        "TOO_MANY_AUTH_REQUESTS",
        "Too many authentication attempts, please try again later",
    )
    .await
}

async fn enforce_rate_limit(
    limiter: &RateLimiter,
    scope: Scope,
    req: Request<Body>,
    next: Next,
    code: &'static str,
    message: &'static str,
) -> Response {
    let ip = extract_client_ip(&req).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let check = limiter.check(Key { scope, ip }).await;

    if !check.allowed {
        tracing::warn!(%ip, ?scope, "rate limit exceeded");
        let mut res = json_error(StatusCode::TOO_MANY_REQUESTS, code, message).into_response();
        apply_rate_limit_headers(&mut res, check);
        return res;
    }

    let mut res = next.run(req).await;
    apply_rate_limit_headers(&mut res, check);
    res
}

fn apply_rate_limit_headers(res: &mut Response, check: RateLimitCheck) {
    if let Ok(value) = HeaderValue::from_str(&check.limit.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&check.remaining.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_REMAINING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&check.reset_after_seconds.to_string()) {
        res.headers_mut().insert(RATE_LIMIT_RESET, value.clone());
        if check.remaining == 0 {
            res.headers_mut().insert(RETRY_AFTER, value);
        }
    }
}

fn matches_api_prefix(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn should_skip(req: &Request<Body>) -> bool {
    is_test_env() || is_loopback_request(req)
}

fn api_config() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: env_u64("RATE_LIMIT_WINDOW_MS").unwrap_or(DEFAULT_API_WINDOW_MS),
        max: env_u64("RATE_LIMIT_MAX").unwrap_or(DEFAULT_API_MAX),
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn is_loopback_request(req: &Request<Body>) -> bool {
    extract_client_ip(req)
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Api,
    Auth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    scope: Scope,
    ip: IpAddr,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitConfig {
    window_ms: u64,
    max: u64,
}

#[derive(Debug)]
struct RateLimiterState {
    entries: HashMap<Key, Entry>,
    last_cleanup_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: u64,
    hits: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitCheck {
    allowed: bool,
    limit: u64,
    remaining: u64,
    reset_after_seconds: u64,
}

#[derive(Debug)]
struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateLimiterState {
                entries: HashMap::new(),
                last_cleanup_ms: now_ms(),
            }),
        }
    }

    async fn check(&self, key: Key) -> RateLimitCheck {
        self.check_at(key, now_ms()).await
    }

    async fn check_at(&self, key: Key, now_ms: u64) -> RateLimitCheck {
        let mut state = self.state.lock().await;

        if now_ms.saturating_sub(state.last_cleanup_ms) >= self.config.window_ms {
            let window_ms = self.config.window_ms;
            state
                .entries
                .retain(|_, entry| now_ms.saturating_sub(entry.window_start_ms) < window_ms);
            state.last_cleanup_ms = now_ms;
        }

        let entry = state.entries.entry(key).or_insert(Entry {
            window_start_ms: now_ms,
            hits: 0,
        });

        if now_ms.saturating_sub(entry.window_start_ms) >= self.config.window_ms {
            entry.window_start_ms = now_ms;
            entry.hits = 0;
        }

        entry.hits = entry.hits.saturating_add(1);
        let allowed = entry.hits <= self.config.max;
        let remaining = self.config.max.saturating_sub(entry.hits);
        let reset_after_ms = self
            .config
            .window_ms
            .saturating_sub(now_ms.saturating_sub(entry.window_start_ms));

        RateLimitCheck {
            allowed,
            limit: self.config.max,
            remaining: if allowed { remaining } else { 0 },
            reset_after_seconds: reset_after_ms.div_ceil(1000),
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn extract_client_ip(req: &Request<Body>) -> Option<IpAddr> {
    if trust_proxy_enabled() {
        if let Some(ip) = extract_x_forwarded_for(req) {
            return Some(ip);
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn trust_proxy_enabled() -> bool {
    let Ok(value) = std::env::var("TRUST_PROXY") else {
        return false;
    };
    let normalized = value.trim().to_ascii_lowercase();
    !normalized.is_empty() && !matches!(normalized.as_str(), "0" | "false")
}

fn extract_x_forwarded_for(req: &Request<Body>) -> Option<IpAddr> {
    let raw = req
        .headers()
        .get(HeaderName::from_static("x-forwarded-for"))?
        .to_str()
        .ok()?;
    raw.split(',').next()?.trim().parse::<IpAddr>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(scope: Scope) -> Key {
        Key {
            scope,
            ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
        }
    }

    #[tokio::test]
    async fn blocks_after_max_hits_in_window() {
        let limiter = RateLimiter::new(RateLimitConfig { window_ms: 1000, max: 2 });

        assert!(limiter.check_at(key(Scope::Api), 0).await.allowed);
        let second = limiter.check_at(key(Scope::Api), 10).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at(key(Scope::Api), 20).await;
        assert!(!third.allowed);
        assert_eq!(third.reset_after_seconds, 1);
    }

    #[tokio::test]
    async fn window_resets_and_scopes_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig { window_ms: 1000, max: 1 });

        assert!(limiter.check_at(key(Scope::Api), 0).await.allowed);
        assert!(!limiter.check_at(key(Scope::Api), 500).await.allowed);
        assert!(limiter.check_at(key(Scope::Auth), 500).await.allowed);
        assert!(limiter.check_at(key(Scope::Api), 1500).await.allowed);
    }
}
