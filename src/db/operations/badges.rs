use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::gamification::{BadgeCriterion, BadgeDefinition};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarnedBadge {
    #[serde(flatten)]
    pub badge: BadgeDefinition,
    pub earned_at: DateTime<Utc>,
}

pub async fn list_definitions(proxy: &DatabaseProxy) -> Result<Vec<BadgeDefinition>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, name, description, icon, criterion_type, criterion_value
        FROM badge_definitions
        ORDER BY criterion_type, criterion_value
        "#,
    )
    .fetch_all(proxy.pool())
    .await?;

    let mut definitions = Vec::with_capacity(rows.len());
    for row in rows {
        let criterion_type: String = row.try_get("criterion_type")?;
        let Some(criterion) = BadgeCriterion::parse(&criterion_type) else {
            tracing::warn!(criterion = %criterion_type, "skipping badge with unknown criterion");
            continue;
        };
        definitions.push(BadgeDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            icon: row.try_get("icon")?,
            criterion,
            value: row.try_get("criterion_value")?,
        });
    }
    Ok(definitions)
}

pub async fn earned_badge_ids(proxy: &DatabaseProxy, user_id: Uuid) -> Result<HashSet<String>, sqlx::Error> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT badge_id FROM user_badges WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(proxy.pool())
        .await?;
    Ok(ids.into_iter().collect())
}

/// Inserts each badge at most once and returns the ids that were new.
pub async fn award(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    badge_ids: &[String],
    earned_at: DateTime<Utc>,
) -> Result<HashSet<String>, sqlx::Error> {
    if badge_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let inserted: Vec<String> = sqlx::query_scalar(
        r#"
        INSERT INTO user_badges (user_id, badge_id, earned_at)
        SELECT $1, badge_id, $3 FROM UNNEST($2::text[]) AS badge_id
        ON CONFLICT (user_id, badge_id) DO NOTHING
        RETURNING badge_id
        "#,
    )
    .bind(user_id)
    .bind(badge_ids)
    .bind(earned_at)
    .fetch_all(proxy.pool())
    .await?;

    Ok(inserted.into_iter().collect())
}

/// Earned badges with their definitions, most recent first.
pub async fn list_earned(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<EarnedBadge>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.name, d.description, d.icon, d.criterion_type, d.criterion_value, ub.earned_at
        FROM user_badges ub
        JOIN badge_definitions d ON d.id = ub.badge_id
        WHERE ub.user_id = $1
        ORDER BY ub.earned_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(proxy.pool())
    .await?;

    let mut earned = Vec::with_capacity(rows.len());
    for row in rows {
        let criterion_type: String = row.try_get("criterion_type")?;
        let Some(criterion) = BadgeCriterion::parse(&criterion_type) else {
            continue;
        };
        earned.push(EarnedBadge {
            badge: BadgeDefinition {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                icon: row.try_get("icon")?,
                criterion,
                value: row.try_get("criterion_value")?,
            },
            earned_at: row.try_get("earned_at")?,
        });
    }
    Ok(earned)
}

pub async fn count_earned(proxy: &DatabaseProxy, user_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM user_badges WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(proxy.pool())
        .await
}
