use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::db::operations::courses::{
    self, Course, CourseLevel, InstructorSummary, PricingType,
};
use crate::db::DatabaseProxy;
use crate::services::progress::{self, LessonCompletionOutcome, QuizAttemptOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Expired,
}

impl EnrollmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub lesson_id: Uuid,
    pub score: f64,
    pub max_score: f64,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub issued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentProgress {
    pub completed_lessons: Vec<Uuid>,
    pub current_lesson: Option<Uuid>,
    pub percentage: i32,
    pub time_spent: i64,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub amount: f64,
    pub method: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    pub progress: EnrollmentProgress,
    pub quiz_attempts: Vec<QuizAttempt>,
    pub certificate: Certificate,
    pub payment: Payment,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourseSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub thumbnail: Option<String>,
    pub short_description: String,
    pub level: CourseLevel,
    pub category_id: Option<Uuid>,
    pub subcategory_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub pricing_type: PricingType,
    pub total_lessons: i32,
    pub total_duration: i32,
    pub instructor: Option<InstructorSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentWithCourse {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub course: EnrolledCourseSummary,
}

const ENROLLMENT_COLUMNS: &str = r#"
    e.id, e.user_id, e.course_id, e.status, e.completed_lessons, e.current_lesson,
    e.percentage, e.time_spent, e.last_accessed_at, e.quiz_attempts, e.certificate,
    e.payment_amount, e.payment_method, e.enrolled_at, e.completed_at
"#;

fn map_enrollment_row(row: &PgRow) -> Result<Enrollment, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let completed_lessons: Json<Vec<Uuid>> = row.try_get("completed_lessons")?;
    let quiz_attempts: Json<Vec<QuizAttempt>> = row.try_get("quiz_attempts")?;
    let certificate: Json<Certificate> = row.try_get("certificate")?;

    Ok(Enrollment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        course_id: row.try_get("course_id")?,
        status: EnrollmentStatus::parse(&status).unwrap_or(EnrollmentStatus::Active),
        progress: EnrollmentProgress {
            completed_lessons: completed_lessons.0,
            current_lesson: row.try_get("current_lesson")?,
            percentage: row.try_get("percentage")?,
            time_spent: row.try_get("time_spent")?,
            last_accessed_at: row.try_get("last_accessed_at")?,
        },
        quiz_attempts: quiz_attempts.0,
        certificate: certificate.0,
        payment: Payment {
            amount: row.try_get("payment_amount")?,
            method: row.try_get("payment_method")?,
        },
        enrolled_at: row.try_get("enrolled_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_enrollment_with_course(row: &PgRow) -> Result<EnrollmentWithCourse, sqlx::Error> {
    let enrollment = map_enrollment_row(row)?;
    let level: String = row.try_get("course_level")?;
    let pricing_type: String = row.try_get("course_pricing_type")?;

    let instructor = match row.try_get::<Option<String>, _>("instructor_first_name")? {
        Some(first_name) => Some(InstructorSummary {
            id: row.try_get("course_instructor_id")?,
            first_name,
            last_name: row
                .try_get::<Option<String>, _>("instructor_last_name")?
                .unwrap_or_default(),
            avatar: row.try_get("instructor_avatar")?,
            bio: None,
        }),
        None => None,
    };

    Ok(EnrollmentWithCourse {
        course: EnrolledCourseSummary {
            id: enrollment.course_id,
            title: row.try_get("course_title")?,
            slug: row.try_get("course_slug")?,
            thumbnail: row.try_get("course_thumbnail")?,
            short_description: row.try_get("course_short_description")?,
            level: CourseLevel::parse(&level).unwrap_or(CourseLevel::Beginner),
            category_id: row.try_get("course_category_id")?,
            subcategory_id: row.try_get("course_subcategory_id")?,
            tags: row.try_get("course_tags")?,
            pricing_type: PricingType::parse(&pricing_type).unwrap_or(PricingType::Free),
            total_lessons: row.try_get("course_total_lessons")?,
            total_duration: row.try_get("course_total_duration")?,
            instructor,
        },
        enrollment,
    })
}

pub async fn find(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Enrollment>, sqlx::Error> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments e WHERE e.user_id = $1 AND e.course_id = $2"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_enrollment_row).transpose()
}

/// Enrollments of a user joined with a summary of each course, newest first.
pub async fn list_for_user(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    status: Option<EnrollmentStatus>,
) -> Result<Vec<EnrollmentWithCourse>, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(ENROLLMENT_COLUMNS);
    qb.push(
        r#",
          c.title AS course_title,
          c.slug AS course_slug,
          c.thumbnail AS course_thumbnail,
          c.short_description AS course_short_description,
          c.level AS course_level,
          c.category_id AS course_category_id,
          c.subcategory_id AS course_subcategory_id,
          c.tags AS course_tags,
          c.pricing_type AS course_pricing_type,
          c.total_lessons AS course_total_lessons,
          c.total_duration AS course_total_duration,
          c.instructor_id AS course_instructor_id,
          u.first_name AS instructor_first_name,
          u.last_name AS instructor_last_name,
          u.avatar AS instructor_avatar
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        LEFT JOIN users u ON u.id = c.instructor_id
        WHERE e.user_id = "#,
    );
    qb.push_bind(user_id);

    if let Some(status) = status {
        qb.push(" AND e.status = ").push_bind(status.as_str());
    }

    qb.push(" ORDER BY e.enrolled_at DESC");

    let rows = qb.build().fetch_all(proxy.pool()).await?;
    rows.iter().map(map_enrollment_with_course).collect()
}

/// Creates a free enrollment and bumps the course counter in one transaction.
/// Returns `None` when the user is already enrolled.
pub async fn create_free(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Enrollment>, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let id = Uuid::new_v4();
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO enrollments (id, user_id, course_id, payment_amount, payment_method)
        VALUES ($1, $2, $3, 0, 'free')
        ON CONFLICT (user_id, course_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?;

    if inserted.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    courses::increment_enrollments(&mut *tx, course_id).await?;

    let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments e WHERE e.id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
    let enrollment = map_enrollment_row(&row)?;

    tx.commit().await?;
    Ok(Some(enrollment))
}

async fn lock_enrollment(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Enrollment>, sqlx::Error> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments e \
         WHERE e.user_id = $1 AND e.course_id = $2 FOR UPDATE"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(map_enrollment_row).transpose()
}

async fn save_enrollment(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    enrollment: &Enrollment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE enrollments SET
            status = $2,
            completed_lessons = $3,
            current_lesson = $4,
            percentage = $5,
            time_spent = $6,
            last_accessed_at = $7,
            quiz_attempts = $8,
            certificate = $9,
            completed_at = $10
        WHERE id = $1
        "#,
    )
    .bind(enrollment.id)
    .bind(enrollment.status.as_str())
    .bind(Json(&enrollment.progress.completed_lessons))
    .bind(enrollment.progress.current_lesson)
    .bind(enrollment.progress.percentage)
    .bind(enrollment.progress.time_spent)
    .bind(enrollment.progress.last_accessed_at)
    .bind(Json(&enrollment.quiz_attempts))
    .bind(Json(&enrollment.certificate))
    .bind(enrollment.completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Marks a lesson complete under a row lock. `Ok(None)` means not enrolled.
pub async fn record_lesson_completion(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    course: &Course,
    lesson_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<(Enrollment, LessonCompletionOutcome)>, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let Some(mut enrollment) = lock_enrollment(&mut tx, user_id, course.id).await? else {
        tx.rollback().await?;
        return Ok(None);
    };

    let outcome = progress::apply_lesson_completion(
        &mut enrollment,
        lesson_id,
        course.content.total_lessons,
        now,
    );

    save_enrollment(&mut tx, &enrollment).await?;
    if outcome.course_completed {
        courses::increment_completions(&mut *tx, course.id).await?;
    }

    tx.commit().await?;
    Ok(Some((enrollment, outcome)))
}

pub async fn record_quiz_attempt(
    proxy: &DatabaseProxy,
    user_id: Uuid,
    course_id: Uuid,
    attempt: QuizAttempt,
) -> Result<Option<(Enrollment, QuizAttemptOutcome)>, sqlx::Error> {
    let mut tx = proxy.pool().begin().await?;

    let Some(mut enrollment) = lock_enrollment(&mut tx, user_id, course_id).await? else {
        tx.rollback().await?;
        return Ok(None);
    };

    let outcome = progress::apply_quiz_attempt(&mut enrollment, attempt);
    save_enrollment(&mut tx, &enrollment).await?;

    tx.commit().await?;
    Ok(Some((enrollment, outcome)))
}
