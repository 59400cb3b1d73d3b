use chrono::{DateTime, Days, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

pub const MAX_PROMPT_CHARS: usize = 2000;

/// The quota bucket a moment falls into: its UTC calendar date.
pub fn quota_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Next UTC midnight after `now`.
pub fn resets_at(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = quota_day(now)
        .checked_add_days(Days::new(1))
        .unwrap_or(NaiveDate::MAX);
    Utc.from_utc_datetime(&tomorrow.and_time(chrono::NaiveTime::MIN))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
}

impl QuotaUsage {
    pub fn new(used: i32, limit: i32) -> Self {
        let used = used.max(0);
        Self {
            used,
            limit,
            remaining: (limit - used).max(0),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    #[serde(flatten)]
    pub usage: QuotaUsage,
    pub resets_at: String,
}

impl DailyUsage {
    pub fn new(used: i32, limit: i32, now: DateTime<Utc>) -> Self {
        Self {
            usage: QuotaUsage::new(used, limit),
            resets_at: resets_at(now).to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Prompt is required")]
    Empty,
    #[error("Prompt must be at most {MAX_PROMPT_CHARS} characters")]
    TooLong,
}

pub fn normalize_prompt(raw: &str) -> Result<String, PromptError> {
    let prompt = raw.trim();
    if prompt.is_empty() {
        return Err(PromptError::Empty);
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(PromptError::TooLong);
    }
    Ok(prompt.to_string())
}
