use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("AI provider not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyChoices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub available: bool,
}

/// Anything that can turn a system + user prompt into generated text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn provider_info(&self) -> ProviderInfo;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError>;

    fn is_available(&self) -> bool {
        self.provider_info().available
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_string("LLM_API_KEY"),
            model: env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_endpoint: normalize_endpoint(
                env_string("LLM_API_ENDPOINT")
                    .or_else(|| env_string("LLM_BASE_URL"))
                    .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            ),
            timeout: Duration::from_millis(env_u64("LLM_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS)),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct OpenAiGenerator {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::NotConfigured("LLM_API_KEY"))?;

        let url = format!("{}/chat/completions", self.config.api_endpoint.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": false
        });

        let response = self.post_with_retry(&url, api_key, &payload).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyChoices)
    }

    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        payload: &serde_json::Value,
    ) -> Result<ChatResponse, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for retry in 0..=MAX_RETRIES {
            match self.client.post(url).bearer_auth(api_key).json(payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        return serde_json::from_slice(&bytes).map_err(|err| {
                            tracing::error!(error = %err, "failed to decode AI provider response");
                            LlmError::Json(err)
                        });
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = LlmError::HttpStatus { status, body };
                    if retry < MAX_RETRIES && is_retryable(status) {
                        warn!(retry, ?status, "AI provider request failed, retrying");
                        sleep(backoff(retry)).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = LlmError::Request(e);
                    if retry < MAX_RETRIES {
                        warn!(retry, "AI provider request error, retrying");
                        sleep(backoff(retry)).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_error.unwrap_or(LlmError::NotConfigured("unknown")))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn provider_info(&self) -> ProviderInfo {
        let available = self.config.api_key.as_deref().is_some_and(|v| !v.trim().is_empty())
            && !self.config.model.trim().is_empty()
            && !self.config.api_endpoint.trim().is_empty();
        ProviderInfo {
            name: "openai".to_string(),
            model: self.config.model.clone(),
            available,
        }
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let messages = [
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: prompt.into() },
        ];
        self.chat(&messages).await
    }
}

fn backoff(retry: usize) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << retry))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(str::to_string),
            model: DEFAULT_MODEL.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            timeout: Duration::from_secs(1),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    #[test]
    fn endpoint_gets_version_suffix() {
        assert_eq!(normalize_endpoint("https://llm.local/".into()), "https://llm.local/v1");
        assert_eq!(normalize_endpoint("https://llm.local/v1".into()), "https://llm.local/v1");
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(reqwest::StatusCode::BAD_REQUEST));
    }

    #[test]
    fn availability_requires_api_key() {
        assert!(!OpenAiGenerator::new(config(None)).is_available());
        assert!(!OpenAiGenerator::new(config(Some("  "))).is_available());
        assert!(OpenAiGenerator::new(config(Some("sk-test"))).is_available());
    }

    #[tokio::test]
    async fn generate_without_key_fails_fast() {
        let generator = OpenAiGenerator::new(config(None));
        let err = generator.generate("system", "hello").await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured("LLM_API_KEY")));
    }
}
