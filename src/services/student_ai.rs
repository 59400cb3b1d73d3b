use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::services::ai_quota::{self, PromptError, QuotaUsage};
use crate::services::llm_provider::{ContentGenerator, LlmError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationEntry {
    pub prompt: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-(user, course, UTC day) generation counter.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn used(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<i32, sqlx::Error>;

    /// Takes one slot if fewer than `limit` are used. Returns the new count,
    /// or `None` when the day is already exhausted.
    async fn try_reserve(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
        limit: i32,
    ) -> Result<Option<i32>, sqlx::Error>;

    async fn release(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<(), sqlx::Error>;

    async fn append_generation(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
        entry: &GenerationEntry,
    ) -> Result<(), sqlx::Error>;
}

#[derive(Debug, Error)]
pub enum StudentGenerationError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("Daily AI generation limit reached")]
    LimitReached(QuotaUsage),
    #[error("AI generation failed: {0}")]
    Generation(#[source] LlmError),
    #[error("quota storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct StudentGenerationRequest<'a> {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub course_title: &'a str,
    pub prompt: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGeneration {
    pub content: String,
    pub usage: QuotaUsage,
    pub generated_at: DateTime<Utc>,
}

pub fn student_system_prompt(course_title: &str) -> String {
    format!(
        "You are a friendly tutor for the online course \"{course_title}\". \
         Answer the learner's request with clear explanations, short examples \
         and practice ideas. Format the answer in Markdown."
    )
}

/// Reserve a slot, call the provider, then log the result. A provider
/// failure gives the slot back.
pub async fn generate_for_student<L, G>(
    ledger: &L,
    generator: &G,
    request: StudentGenerationRequest<'_>,
    limit: i32,
    now: DateTime<Utc>,
) -> Result<StudentGeneration, StudentGenerationError>
where
    L: QuotaLedger + ?Sized,
    G: ContentGenerator + ?Sized,
{
    let prompt = ai_quota::normalize_prompt(request.prompt)?;
    let day = ai_quota::quota_day(now);
    let StudentGenerationRequest { user_id, course_id, .. } = request;

    let Some(used) = ledger.try_reserve(user_id, course_id, day, limit).await? else {
        let used = ledger.used(user_id, course_id, day).await?;
        return Err(StudentGenerationError::LimitReached(QuotaUsage::new(used, limit)));
    };

    let system = student_system_prompt(request.course_title);
    let content = match generator.generate(&system, &prompt).await {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(user_id = %user_id, course_id = %course_id, error = %err, "student generation failed");
            if let Err(release_err) = ledger.release(user_id, course_id, day).await {
                tracing::error!(
                    user_id = %user_id,
                    course_id = %course_id,
                    error = %release_err,
                    "failed to release quota slot"
                );
            }
            return Err(StudentGenerationError::Generation(err));
        }
    };

    let entry = GenerationEntry {
        prompt,
        content,
        created_at: now,
    };
    // The slot is spent and the learner gets the answer even if logging it fails.
    if let Err(err) = ledger.append_generation(user_id, course_id, day, &entry).await {
        tracing::error!(user_id = %user_id, course_id = %course_id, error = %err, "failed to store generation");
    }

    tracing::info!(user_id = %user_id, course_id = %course_id, used, limit, "student generation completed");

    Ok(StudentGeneration {
        content: entry.content,
        usage: QuotaUsage::new(used, limit),
        generated_at: now,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;
    use crate::services::llm_provider::ProviderInfo;

    type Key = (Uuid, Uuid, NaiveDate);

    #[derive(Default)]
    pub struct InMemoryLedger {
        rows: Mutex<HashMap<Key, (i32, Vec<GenerationEntry>)>>,
    }

    impl InMemoryLedger {
        pub async fn entries(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Vec<GenerationEntry> {
            let rows = self.rows.lock().await;
            rows.get(&(user_id, course_id, day))
                .map(|(_, entries)| entries.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl QuotaLedger for InMemoryLedger {
        async fn used(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<i32, sqlx::Error> {
            let rows = self.rows.lock().await;
            Ok(rows.get(&(user_id, course_id, day)).map_or(0, |(used, _)| *used))
        }

        async fn try_reserve(
            &self,
            user_id: Uuid,
            course_id: Uuid,
            day: NaiveDate,
            limit: i32,
        ) -> Result<Option<i32>, sqlx::Error> {
            let mut rows = self.rows.lock().await;
            let (used, _) = rows.entry((user_id, course_id, day)).or_default();
            if *used >= limit {
                return Ok(None);
            }
            *used += 1;
            Ok(Some(*used))
        }

        async fn release(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().await;
            if let Some((used, _)) = rows.get_mut(&(user_id, course_id, day)) {
                *used = (*used - 1).max(0);
            }
            Ok(())
        }

        async fn append_generation(
            &self,
            user_id: Uuid,
            course_id: Uuid,
            day: NaiveDate,
            entry: &GenerationEntry,
        ) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().await;
            rows.entry((user_id, course_id, day))
                .or_default()
                .1
                .push(entry.clone());
            Ok(())
        }
    }

    /// Echoes the prompt back, or fails every call when `failing`.
    #[derive(Default)]
    pub struct StubGenerator {
        pub failing: bool,
        pub calls: AtomicUsize,
    }

    impl StubGenerator {
        pub fn failing() -> Self {
            Self {
                failing: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentGenerator for StubGenerator {
        fn provider_info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "stub".to_string(),
                model: "stub-1".to_string(),
                available: !self.failing,
            }
        }

        async fn generate(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(LlmError::EmptyChoices);
            }
            Ok(format!("generated: {prompt}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::testing::{InMemoryLedger, StubGenerator};
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    fn request<'a>(user_id: Uuid, course_id: Uuid, prompt: &'a str) -> StudentGenerationRequest<'a> {
        StudentGenerationRequest {
            user_id,
            course_id,
            course_title: "Rust Basics",
            prompt,
        }
    }

    #[tokio::test]
    async fn third_generation_of_the_day_is_rejected() {
        let ledger = InMemoryLedger::default();
        let generator = StubGenerator::default();
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());

        let first = generate_for_student(&ledger, &generator, request(user, course, "one"), 2, now())
            .await
            .unwrap();
        assert_eq!(first.usage, QuotaUsage::new(1, 2));

        let second = generate_for_student(&ledger, &generator, request(user, course, "two"), 2, now())
            .await
            .unwrap();
        assert_eq!(second.usage.remaining, 0);

        let third = generate_for_student(&ledger, &generator, request(user, course, "three"), 2, now()).await;
        match third {
            Err(StudentGenerationError::LimitReached(usage)) => {
                assert_eq!(usage.used, 2);
                assert_eq!(usage.remaining, 0);
            }
            other => panic!("expected limit error, got {other:?}"),
        }
        assert_eq!(generator.call_count(), 2);
        assert_eq!(ledger.entries(user, course, quota_day_now()).await.len(), 2);
    }

    fn quota_day_now() -> NaiveDate {
        ai_quota::quota_day(now())
    }

    #[tokio::test]
    async fn quota_is_scoped_per_course_and_day() {
        let ledger = InMemoryLedger::default();
        let generator = StubGenerator::default();
        let user = Uuid::new_v4();
        let (course_a, course_b) = (Uuid::new_v4(), Uuid::new_v4());

        for _ in 0..2 {
            generate_for_student(&ledger, &generator, request(user, course_a, "q"), 2, now())
                .await
                .unwrap();
        }
        assert!(generate_for_student(&ledger, &generator, request(user, course_b, "q"), 2, now())
            .await
            .is_ok());

        let tomorrow = now() + chrono::Duration::days(1);
        assert!(generate_for_student(&ledger, &generator, request(user, course_a, "q"), 2, tomorrow)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn provider_failure_releases_the_slot() {
        let ledger = InMemoryLedger::default();
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());

        let failed = generate_for_student(&ledger, &StubGenerator::failing(), request(user, course, "q"), 2, now()).await;
        assert!(matches!(failed, Err(StudentGenerationError::Generation(_))));
        assert_eq!(ledger.used(user, course, quota_day_now()).await.unwrap(), 0);
        assert!(ledger.entries(user, course, quota_day_now()).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_prompt_consumes_nothing() {
        let ledger = InMemoryLedger::default();
        let generator = StubGenerator::default();
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());

        let result = generate_for_student(&ledger, &generator, request(user, course, "   "), 2, now()).await;
        assert!(matches!(result, Err(StudentGenerationError::Prompt(PromptError::Empty))));
        assert_eq!(ledger.used(user, course, quota_day_now()).await.unwrap(), 0);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_limit() {
        let ledger = Arc::new(InMemoryLedger::default());
        let generator = Arc::new(StubGenerator::default());
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let generator = Arc::clone(&generator);
                tokio::spawn(async move {
                    let prompt = format!("prompt {i}");
                    generate_for_student(
                        ledger.as_ref(),
                        generator.as_ref(),
                        request(user, course, &prompt),
                        2,
                        now(),
                    )
                    .await
                    .is_ok()
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 2);
        assert_eq!(ledger.used(user, course, quota_day_now()).await.unwrap(), 2);
    }
}
