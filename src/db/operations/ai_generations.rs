use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::student_ai::{GenerationEntry, QuotaLedger};

/// Postgres-backed ledger; one row per (user, course, day).
#[derive(Clone)]
pub struct PgQuotaLedger {
    pool: PgPool,
}

impl PgQuotaLedger {
    pub fn new(proxy: &DatabaseProxy) -> Self {
        Self {
            pool: proxy.pool().clone(),
        }
    }
}

#[async_trait]
impl QuotaLedger for PgQuotaLedger {
    async fn used(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<i32, sqlx::Error> {
        let used: Option<i32> = sqlx::query_scalar(
            "SELECT generations_used FROM ai_generations WHERE user_id = $1 AND course_id = $2 AND day = $3",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.unwrap_or(0))
    }

    async fn try_reserve(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
        limit: i32,
    ) -> Result<Option<i32>, sqlx::Error> {
        if limit <= 0 {
            return Ok(None);
        }

        // The conditional upsert is the only guard against concurrent overdraw.
        sqlx::query_scalar(
            r#"
            INSERT INTO ai_generations (id, user_id, course_id, day, generations_used)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (user_id, course_id, day) DO UPDATE
                SET generations_used = ai_generations.generations_used + 1,
                    updated_at = NOW()
                WHERE ai_generations.generations_used < $5
            RETURNING generations_used
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .bind(day)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await
    }

    async fn release(&self, user_id: Uuid, course_id: Uuid, day: NaiveDate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE ai_generations
            SET generations_used = GREATEST(generations_used - 1, 0),
                updated_at = NOW()
            WHERE user_id = $1 AND course_id = $2 AND day = $3
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_generation(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        day: NaiveDate,
        entry: &GenerationEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE ai_generations
            SET generations = generations || jsonb_build_array($4::jsonb),
                updated_at = NOW()
            WHERE user_id = $1 AND course_id = $2 AND day = $3
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(day)
        .bind(Json(entry))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub prompt: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub date: NaiveDate,
}

/// Every generation for a user in a course across all days, newest first.
pub async fn history(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Vec<HistoryItem>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT day, generations FROM ai_generations WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await?;

    let mut items = Vec::new();
    for row in rows {
        let day: NaiveDate = row.try_get("day")?;
        let entries: Json<Vec<GenerationEntry>> = row.try_get("generations")?;
        items.extend(entries.0.into_iter().map(|entry| HistoryItem {
            prompt: entry.prompt,
            content: entry.content,
            created_at: entry.created_at,
            date: day,
        }));
    }

    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(items)
}
