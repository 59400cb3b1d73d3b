use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::db::DatabaseProxy;
use crate::services::course_query::{CourseSort, PricingFilter, ValidatedCourseQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Intermediate => "Intermediate",
            Self::Advanced => "Advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingType {
    Free,
    Paid,
    Subscription,
}

impl PricingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::Subscription => "subscription",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

impl CourseStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "published" => Self::Published,
            "archived" => Self::Archived,
            _ => Self::Draft,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Video,
    Article,
    Quiz,
    Exercise,
}

impl LessonType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "article" => Some(Self::Article),
            "quiz" => Some(Self::Quiz),
            "exercise" => Some(Self::Exercise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub lesson_type: LessonType,
    pub duration: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub is_preview: bool,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseModule {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub order: i32,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContent {
    pub modules: Vec<CourseModule>,
    pub total_lessons: i32,
    pub total_duration: i32,
    pub total_quizzes: i32,
}

impl CourseContent {
    pub fn find_lesson(&self, lesson_id: Uuid) -> Option<&Lesson> {
        self.modules
            .iter()
            .flat_map(|module| module.lessons.iter())
            .find(|lesson| lesson.id == lesson_id)
    }

    pub fn find_lesson_mut(&mut self, module_id: Uuid, lesson_id: Uuid) -> Option<&mut Lesson> {
        self.modules
            .iter_mut()
            .find(|module| module.id == module_id)?
            .lessons
            .iter_mut()
            .find(|lesson| lesson.id == lesson_id)
    }

    /// Drops lesson bodies except for preview lessons.
    pub fn hide_locked_content(&mut self) {
        for lesson in self.modules.iter_mut().flat_map(|m| m.lessons.iter_mut()) {
            if !lesson.is_preview {
                lesson.content = None;
            }
        }
    }

    pub fn strip_lesson_content(&mut self) {
        for lesson in self.modules.iter_mut().flat_map(|m| m.lessons.iter_mut()) {
            lesson.content = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    #[serde(rename = "type")]
    pub pricing_type: PricingType,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub enrollments: i64,
    pub completions: i64,
    pub average_rating: f64,
    pub total_ratings: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub short_description: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub instructor_id: Uuid,
    pub category_id: Option<Uuid>,
    pub subcategory_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub level: CourseLevel,
    pub pricing: Pricing,
    pub status: CourseStatus,
    pub content: CourseContent,
    pub stats: CourseStats,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWithRefs {
    #[serde(flatten)]
    pub course: Course,
    pub instructor: Option<InstructorSummary>,
    pub category: Option<CategorySummary>,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub slug: String,
    pub title: String,
    pub short_description: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub instructor_id: Uuid,
    pub category_id: Uuid,
    pub subcategory_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub level: CourseLevel,
    pub pricing: Pricing,
}

const COURSE_SELECT: &str = r#"
    SELECT
      c.id, c.slug, c.title, c.short_description, c.description, c.thumbnail,
      c.instructor_id, c.category_id, c.subcategory_id, c.tags, c.level,
      c.pricing_type, c.price, c.currency, c.status, c.modules,
      c.total_lessons, c.total_duration, c.total_quizzes,
      c.enrollments_count, c.completions_count, c.average_rating, c.total_ratings,
      c.published_at, c.created_at, c.updated_at,
      u.first_name AS instructor_first_name,
      u.last_name AS instructor_last_name,
      u.avatar AS instructor_avatar,
      u.bio AS instructor_bio,
      cat.name AS category_name,
      cat.slug AS category_slug
    FROM courses c
    LEFT JOIN users u ON u.id = c.instructor_id
    LEFT JOIN categories cat ON cat.id = c.category_id
"#;

pub(crate) fn map_course_row(row: &PgRow) -> Result<Course, sqlx::Error> {
    let level: String = row.try_get("level")?;
    let pricing_type: String = row.try_get("pricing_type")?;
    let status: String = row.try_get("status")?;
    let modules: Json<Vec<CourseModule>> = row.try_get("modules")?;

    Ok(Course {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        short_description: row.try_get("short_description")?,
        description: row.try_get("description")?,
        thumbnail: row.try_get("thumbnail")?,
        instructor_id: row.try_get("instructor_id")?,
        category_id: row.try_get("category_id")?,
        subcategory_id: row.try_get("subcategory_id")?,
        tags: row.try_get("tags")?,
        level: CourseLevel::parse(&level).unwrap_or(CourseLevel::Beginner),
        pricing: Pricing {
            pricing_type: PricingType::parse(&pricing_type).unwrap_or(PricingType::Free),
            price: row.try_get("price")?,
            currency: row.try_get("currency")?,
        },
        status: CourseStatus::parse(&status),
        content: CourseContent {
            modules: modules.0,
            total_lessons: row.try_get("total_lessons")?,
            total_duration: row.try_get("total_duration")?,
            total_quizzes: row.try_get("total_quizzes")?,
        },
        stats: CourseStats {
            enrollments: row.try_get("enrollments_count")?,
            completions: row.try_get("completions_count")?,
            average_rating: row.try_get("average_rating")?,
            total_ratings: row.try_get("total_ratings")?,
        },
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_course_with_refs(row: &PgRow, include_bio: bool) -> Result<CourseWithRefs, sqlx::Error> {
    let course = map_course_row(row)?;

    let instructor = match row.try_get::<Option<String>, _>("instructor_first_name")? {
        Some(first_name) => Some(InstructorSummary {
            id: course.instructor_id,
            first_name,
            last_name: row
                .try_get::<Option<String>, _>("instructor_last_name")?
                .unwrap_or_default(),
            avatar: row.try_get("instructor_avatar")?,
            bio: if include_bio {
                row.try_get("instructor_bio")?
            } else {
                None
            },
        }),
        None => None,
    };

    let category = match (
        course.category_id,
        row.try_get::<Option<String>, _>("category_name")?,
        row.try_get::<Option<String>, _>("category_slug")?,
    ) {
        (Some(id), Some(name), Some(slug)) => Some(CategorySummary { id, name, slug }),
        _ => None,
    };

    Ok(CourseWithRefs {
        course,
        instructor,
        category,
    })
}

fn push_catalog_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ValidatedCourseQuery) {
    qb.push(" WHERE c.status = 'published'");

    if let Some(category) = query.category {
        qb.push(" AND c.category_id = ").push_bind(category);
    }

    if let Some(level) = query.level {
        qb.push(" AND c.level = ").push_bind(level.as_str());
    }

    match query.pricing {
        Some(PricingFilter::Free) => {
            qb.push(" AND c.pricing_type = 'free'");
        }
        Some(PricingFilter::Paid) => {
            qb.push(" AND c.pricing_type IN ('paid', 'subscription')");
        }
        None => {}
    }

    if let Some(search) = &query.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (c.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.short_description ILIKE ")
            .push_bind(pattern)
            .push(" OR ")
            .push_bind(search.to_lowercase())
            .push(" = ANY(SELECT lower(t) FROM unnest(c.tags) AS t))");
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn order_clause(sort: CourseSort) -> &'static str {
    match sort {
        CourseSort::Newest => " ORDER BY c.published_at DESC NULLS LAST, c.id",
        CourseSort::Popular => " ORDER BY c.enrollments_count DESC, c.id",
        CourseSort::Rating => " ORDER BY c.average_rating DESC, c.id",
        CourseSort::PriceLow => " ORDER BY c.price ASC, c.id",
        CourseSort::PriceHigh => " ORDER BY c.price DESC, c.id",
    }
}

pub async fn list_published(
    proxy: &DatabaseProxy,
    query: &ValidatedCourseQuery,
) -> Result<(Vec<CourseWithRefs>, i64), sqlx::Error> {
    let pool = proxy.pool();

    let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM courses c");
    push_catalog_filters(&mut count_qb, query);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Postgres>::new(COURSE_SELECT);
    push_catalog_filters(&mut qb, query);
    qb.push(order_clause(query.sort));
    qb.push(" LIMIT ").push_bind(query.limit);
    qb.push(" OFFSET ").push_bind(query.offset());

    let rows = qb.build().fetch_all(pool).await?;
    let mut courses = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut item = map_course_with_refs(row, false)?;
        item.course.content.strip_lesson_content();
        courses.push(item);
    }

    Ok((courses, total))
}

pub async fn find_published_by_slug(
    proxy: &DatabaseProxy,
    slug: &str,
) -> Result<Option<CourseWithRefs>, sqlx::Error> {
    let sql = format!("{COURSE_SELECT} WHERE c.slug = $1 AND c.status = 'published'");
    let row = sqlx::query(&sql)
        .bind(slug)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref()
        .map(|row| map_course_with_refs(row, true))
        .transpose()
}

pub async fn find_by_slug(proxy: &DatabaseProxy, slug: &str) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!("{COURSE_SELECT} WHERE c.slug = $1");
    let row = sqlx::query(&sql)
        .bind(slug)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_course_row).transpose()
}

pub async fn find_by_id(proxy: &DatabaseProxy, id: Uuid) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!("{COURSE_SELECT} WHERE c.id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_course_row).transpose()
}

pub async fn find_owned(
    proxy: &DatabaseProxy,
    id: Uuid,
    instructor_id: Uuid,
) -> Result<Option<Course>, sqlx::Error> {
    let sql = format!("{COURSE_SELECT} WHERE c.id = $1 AND c.instructor_id = $2");
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(instructor_id)
        .fetch_optional(proxy.pool())
        .await?;
    row.as_ref().map(map_course_row).transpose()
}

pub async fn list_by_instructor(
    proxy: &DatabaseProxy,
    instructor_id: Uuid,
) -> Result<Vec<CourseWithRefs>, sqlx::Error> {
    let sql = format!("{COURSE_SELECT} WHERE c.instructor_id = $1 ORDER BY c.created_at DESC");
    let rows = sqlx::query(&sql)
        .bind(instructor_id)
        .fetch_all(proxy.pool())
        .await?;
    rows.iter()
        .map(|row| map_course_with_refs(row, false))
        .collect()
}

/// Published courses outside `exclude`, in catalog order.
pub async fn list_recommendation_candidates(
    proxy: &DatabaseProxy,
    exclude: &[Uuid],
    limit: i64,
) -> Result<Vec<CourseWithRefs>, sqlx::Error> {
    let sql = format!(
        "{COURSE_SELECT} WHERE c.status = 'published' AND NOT (c.id = ANY($1)) \
         ORDER BY c.published_at DESC NULLS LAST LIMIT $2"
    );
    let rows = sqlx::query(&sql)
        .bind(exclude.to_vec())
        .bind(limit)
        .fetch_all(proxy.pool())
        .await?;

    let mut courses = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut item = map_course_with_refs(row, false)?;
        item.course.content.strip_lesson_content();
        courses.push(item);
    }
    Ok(courses)
}

pub async fn category_exists(proxy: &DatabaseProxy, id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM categories WHERE id = $1)")
        .bind(id)
        .fetch_one(proxy.pool())
        .await
}

/// `Ok(None)` when the slug is already taken.
pub async fn insert_course(proxy: &DatabaseProxy, new: &NewCourse) -> Result<Option<Course>, sqlx::Error> {
    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO courses (
            id, slug, title, short_description, description, thumbnail,
            instructor_id, category_id, subcategory_id, tags, level,
            pricing_type, price, currency, status
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'draft')
        ON CONFLICT (slug) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(&new.slug)
    .bind(&new.title)
    .bind(&new.short_description)
    .bind(&new.description)
    .bind(&new.thumbnail)
    .bind(new.instructor_id)
    .bind(new.category_id)
    .bind(new.subcategory_id)
    .bind(&new.tags)
    .bind(new.level.as_str())
    .bind(new.pricing.pricing_type.as_str())
    .bind(new.pricing.price)
    .bind(&new.pricing.currency)
    .execute(proxy.pool())
    .await?;

    if inserted.rows_affected() == 0 {
        return Ok(None);
    }
    find_by_id(proxy, id).await
}

/// Persists descriptive fields, pricing and status of an already loaded course.
pub async fn save_course_details(proxy: &DatabaseProxy, course: &Course) -> Result<Course, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE courses SET
            title = $2,
            short_description = $3,
            description = $4,
            thumbnail = $5,
            category_id = $6,
            subcategory_id = $7,
            tags = $8,
            level = $9,
            pricing_type = $10,
            price = $11,
            currency = $12,
            status = $13,
            published_at = $14,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(course.id)
    .bind(&course.title)
    .bind(&course.short_description)
    .bind(&course.description)
    .bind(&course.thumbnail)
    .bind(course.category_id)
    .bind(course.subcategory_id)
    .bind(&course.tags)
    .bind(course.level.as_str())
    .bind(course.pricing.pricing_type.as_str())
    .bind(course.pricing.price)
    .bind(&course.pricing.currency)
    .bind(course.status.as_str())
    .bind(course.published_at)
    .execute(proxy.pool())
    .await?;

    find_by_id(proxy, course.id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Applies `apply` to the module/lesson tree of a course owned by
/// `instructor_id` while holding a row lock. Returns `Ok(None)` when the
/// course does not exist or belongs to someone else.
pub async fn modify_content<T, E>(
    proxy: &DatabaseProxy,
    course_id: Uuid,
    instructor_id: Uuid,
    apply: impl FnOnce(&mut CourseContent) -> Result<T, E>,
) -> Result<Option<T>, E>
where
    E: From<sqlx::Error>,
{
    let mut tx = proxy.pool().begin().await?;

    let row = sqlx::query(
        r#"
        SELECT modules, total_lessons, total_duration, total_quizzes
        FROM courses
        WHERE id = $1 AND instructor_id = $2
        FOR UPDATE
        "#,
    )
    .bind(course_id)
    .bind(instructor_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let modules: Json<Vec<CourseModule>> = row.try_get("modules")?;
    let mut content = CourseContent {
        modules: modules.0,
        total_lessons: row.try_get("total_lessons")?,
        total_duration: row.try_get("total_duration")?,
        total_quizzes: row.try_get("total_quizzes")?,
    };

    let value = apply(&mut content)?;

    sqlx::query(
        r#"
        UPDATE courses SET
            modules = $2,
            total_lessons = $3,
            total_duration = $4,
            total_quizzes = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(course_id)
    .bind(Json(&content.modules))
    .bind(content.total_lessons)
    .bind(content.total_duration)
    .bind(content.total_quizzes)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(value))
}

pub async fn increment_enrollments<'e, X>(executor: X, course_id: Uuid) -> Result<(), sqlx::Error>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE courses SET enrollments_count = enrollments_count + 1 WHERE id = $1")
        .bind(course_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn increment_completions<'e, X>(executor: X, course_id: Uuid) -> Result<(), sqlx::Error>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE courses SET completions_count = completions_count + 1 WHERE id = $1")
        .bind(course_id)
        .execute(executor)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(title: &str, preview: bool) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            title: title.to_string(),
            slug: title.to_lowercase(),
            lesson_type: LessonType::Article,
            duration: 10,
            content: Some(serde_json::json!({ "article": title })),
            is_preview: preview,
            order: 0,
        }
    }

    #[test]
    fn hide_locked_content_keeps_previews() {
        let mut content = CourseContent {
            modules: vec![CourseModule {
                id: Uuid::new_v4(),
                title: "Intro".to_string(),
                description: None,
                order: 0,
                lessons: vec![lesson("Welcome", true), lesson("Deep dive", false)],
            }],
            total_lessons: 2,
            total_duration: 20,
            total_quizzes: 0,
        };

        content.hide_locked_content();

        let lessons = &content.modules[0].lessons;
        assert!(lessons[0].content.is_some());
        assert!(lessons[1].content.is_none());
    }

    #[test]
    fn find_lesson_searches_all_modules() {
        let target = lesson("Target", false);
        let target_id = target.id;
        let content = CourseContent {
            modules: vec![
                CourseModule {
                    id: Uuid::new_v4(),
                    title: "One".to_string(),
                    description: None,
                    order: 0,
                    lessons: vec![lesson("A", false)],
                },
                CourseModule {
                    id: Uuid::new_v4(),
                    title: "Two".to_string(),
                    description: None,
                    order: 1,
                    lessons: vec![target],
                },
            ],
            ..CourseContent::default()
        };

        assert_eq!(content.find_lesson(target_id).map(|l| l.title.as_str()), Some("Target"));
        assert!(content.find_lesson(Uuid::new_v4()).is_none());
    }

    #[test]
    fn lesson_serializes_type_field() {
        let value = serde_json::to_value(lesson("Quiz time", false)).unwrap();
        assert_eq!(value["type"], "article");
        assert_eq!(value["isPreview"], false);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
    }
}
