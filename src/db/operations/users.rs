use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::gamification::{self, Streak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "instructor" => Some(Self::Instructor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }

    pub fn can_author(self) -> bool {
        matches!(self, Self::Instructor | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Free,
    Hero,
    Guild,
}

impl SubscriptionPlan {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "hero" => Some(Self::Hero),
            "guild" => Some(Self::Guild),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Hero => "hero",
            Self::Guild => "guild",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    None,
}

impl SubscriptionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "past_due" => Some(Self::PastDue),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Subscription {
    /// A paid plan that is active, or canceled but still inside its paid period.
    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        if self.plan == SubscriptionPlan::Free {
            return false;
        }
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Canceled => self.current_period_end.is_some_and(|end| end > now),
            SubscriptionStatus::PastDue | SubscriptionStatus::None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub timezone: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gamification {
    pub points: i64,
    pub level: i32,
    pub streak: Streak,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub profile: UserProfile,
    pub subscription: Subscription,
    pub gamification: Gamification,
    pub preferences: Preferences,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
    pub dark_mode: Option<bool>,
}

const USER_COLUMNS: &str = r#"
    id, email, password_hash, role, first_name, last_name, bio, avatar, timezone, language,
    subscription_plan, subscription_status, subscription_period_end,
    points, level, streak_current, streak_longest, streak_last_activity,
    email_notifications, push_notifications, dark_mode,
    is_verified, is_active, created_at, updated_at
"#;

fn map_user_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let plan: String = row.try_get("subscription_plan")?;
    let status: String = row.try_get("subscription_status")?;

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::parse(&role).unwrap_or(Role::Student),
        profile: UserProfile {
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            bio: row.try_get("bio")?,
            avatar: row.try_get("avatar")?,
            timezone: row.try_get("timezone")?,
            language: row.try_get("language")?,
        },
        subscription: Subscription {
            plan: SubscriptionPlan::parse(&plan).unwrap_or(SubscriptionPlan::Free),
            status: SubscriptionStatus::parse(&status).unwrap_or(SubscriptionStatus::None),
            current_period_end: row.try_get("subscription_period_end")?,
        },
        gamification: Gamification {
            points: row.try_get("points")?,
            level: row.try_get("level")?,
            streak: Streak {
                current: row.try_get("streak_current")?,
                longest: row.try_get("streak_longest")?,
                last_activity_date: row.try_get("streak_last_activity")?,
            },
        },
        preferences: Preferences {
            email_notifications: row.try_get("email_notifications")?,
            push_notifications: row.try_get("push_notifications")?,
            dark_mode: row.try_get("dark_mode")?,
        },
        is_verified: row.try_get("is_verified")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn find_by_id(proxy: &DatabaseProxy, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(proxy.pool()).await?;
    row.as_ref().map(map_user_row).transpose()
}

pub async fn find_by_email(proxy: &DatabaseProxy, email: &str) -> Result<Option<User>, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let row = sqlx::query(&sql)
        .bind(email)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_user_row).transpose()
}

/// `Ok(None)` when the email is already registered.
pub async fn insert_user(proxy: &DatabaseProxy, new_user: &NewUser) -> Result<Option<User>, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO NOTHING
        RETURNING {USER_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_user_row).transpose()
}

pub async fn update_profile(
    proxy: &DatabaseProxy,
    id: Uuid,
    update: &ProfileUpdate,
) -> Result<Option<User>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE users SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            bio = COALESCE($4, bio),
            avatar = COALESCE($5, avatar),
            timezone = COALESCE($6, timezone),
            language = COALESCE($7, language),
            updated_at = NOW()
        WHERE id = $1 AND is_active
        RETURNING {USER_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(update.first_name.as_deref())
        .bind(update.last_name.as_deref())
        .bind(update.bio.as_deref())
        .bind(update.avatar.as_deref())
        .bind(update.timezone.as_deref())
        .bind(update.language.as_deref())
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_user_row).transpose()
}

pub async fn update_preferences(
    proxy: &DatabaseProxy,
    id: Uuid,
    update: &PreferencesUpdate,
) -> Result<Option<User>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE users SET
            email_notifications = COALESCE($2, email_notifications),
            push_notifications = COALESCE($3, push_notifications),
            dark_mode = COALESCE($4, dark_mode),
            updated_at = NOW()
        WHERE id = $1 AND is_active
        RETURNING {USER_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(update.email_notifications)
        .bind(update.push_notifications)
        .bind(update.dark_mode)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_user_row).transpose()
}

/// Deactivates the account, frees its email and drops every session.
pub async fn soft_delete(proxy: &DatabaseProxy, id: Uuid) -> Result<(), sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    sqlx::query(
        r#"
        UPDATE users SET
            is_active = FALSE,
            email = 'deleted_' || id::text || '@deleted.com',
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Marks an active paid subscription canceled; access runs to period end.
/// `Ok(None)` when there is nothing to cancel.
pub async fn cancel_subscription(
    proxy: &DatabaseProxy,
    id: Uuid,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE users SET
            subscription_status = 'canceled',
            updated_at = NOW()
        WHERE id = $1 AND subscription_status = 'active' AND subscription_plan <> 'free'
        RETURNING subscription_plan, subscription_status, subscription_period_end
        "#,
    )
    .bind(id)
    .fetch_optional(proxy.pool())
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let plan: String = row.try_get("subscription_plan")?;
    let status: String = row.try_get("subscription_status")?;
    Ok(Some(Subscription {
        plan: SubscriptionPlan::parse(&plan).unwrap_or(SubscriptionPlan::Free),
        status: SubscriptionStatus::parse(&status).unwrap_or(SubscriptionStatus::None),
        current_period_end: row.try_get("subscription_period_end")?,
    }))
}

/// Adds points, recomputes the level and advances the streak under a row lock.
pub async fn apply_activity(
    proxy: &DatabaseProxy,
    id: Uuid,
    points: i64,
    today: NaiveDate,
) -> Result<Gamification, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let row = sqlx::query(
        r#"
        SELECT points, streak_current, streak_longest, streak_last_activity
        FROM users WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    let current_points: i64 = row.try_get("points")?;
    let streak = Streak {
        current: row.try_get("streak_current")?,
        longest: row.try_get("streak_longest")?,
        last_activity_date: row.try_get("streak_last_activity")?,
    }
    .record_activity(today);

    let total = current_points.saturating_add(points.max(0));
    let level = gamification::level_for_points(total);

    sqlx::query(
        r#"
        UPDATE users SET
            points = $2,
            level = $3,
            streak_current = $4,
            streak_longest = $5,
            streak_last_activity = $6,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(total)
    .bind(level)
    .bind(streak.current)
    .bind(streak.longest)
    .bind(streak.last_activity_date)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Gamification {
        points: total,
        level,
        streak,
    })
}

pub async fn insert_session(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

/// The active owner of an unexpired session.
pub async fn find_session_user(
    proxy: &DatabaseProxy,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {USER_COLUMNS} FROM users
        WHERE is_active AND id = (
            SELECT user_id FROM sessions WHERE token_hash = $1 AND expires_at > $2
        )
        "#
    );
    let row = sqlx::query(&sql)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_user_row).transpose()
}

pub async fn delete_session(proxy: &DatabaseProxy, token_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(proxy.pool())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(plan: SubscriptionPlan, status: SubscriptionStatus, end: Option<DateTime<Utc>>) -> Subscription {
        Subscription {
            plan,
            status,
            current_period_end: end,
        }
    }

    #[test]
    fn free_plan_is_never_premium() {
        let now = Utc::now();
        assert!(!subscription(SubscriptionPlan::Free, SubscriptionStatus::Active, None).is_premium(now));
    }

    #[test]
    fn active_paid_plan_is_premium() {
        let now = Utc::now();
        assert!(subscription(SubscriptionPlan::Hero, SubscriptionStatus::Active, None).is_premium(now));
        assert!(!subscription(SubscriptionPlan::Guild, SubscriptionStatus::PastDue, None).is_premium(now));
    }

    #[test]
    fn canceled_plan_lasts_until_period_end() {
        let now = Utc::now();
        let future = Some(now + Duration::days(3));
        let past = Some(now - Duration::days(1));
        assert!(subscription(SubscriptionPlan::Hero, SubscriptionStatus::Canceled, future).is_premium(now));
        assert!(!subscription(SubscriptionPlan::Hero, SubscriptionStatus::Canceled, past).is_premium(now));
    }

    #[test]
    fn enums_round_trip_their_storage_names() {
        for role in [Role::Student, Role::Instructor, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(SubscriptionStatus::parse("cancelled"), Some(SubscriptionStatus::Canceled));
        assert_eq!(SubscriptionStatus::parse("past_due"), Some(SubscriptionStatus::PastDue));
        assert!(Role::Instructor.can_author());
        assert!(!Role::Student.can_author());
    }
}
