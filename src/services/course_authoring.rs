use std::future::Future;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::courses::{
    Course, CourseContent, CourseLevel, CourseModule, CourseStatus, Lesson, LessonType, NewCourse,
    Pricing, PricingType,
};
use crate::services::course_query::slugify;

const MIN_TITLE_CHARS: usize = 3;
const MAX_TITLE_CHARS: usize = 200;
const MAX_SHORT_DESCRIPTION_CHARS: usize = 300;
const MAX_TAGS: usize = 10;
const MAX_LESSON_MINUTES: i32 = 24 * 60;
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthoringError {
    #[error("title must be between {MIN_TITLE_CHARS} and {MAX_TITLE_CHARS} characters")]
    InvalidTitle,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("shortDescription is limited to {MAX_SHORT_DESCRIPTION_CHARS} characters")]
    ShortDescriptionTooLong,
    #[error("category must be a valid id")]
    InvalidCategory,
    #[error("subcategory must be a valid id")]
    InvalidSubcategory,
    #[error("level must be one of beginner, intermediate, advanced")]
    InvalidLevel,
    #[error("pricing type must be one of free, paid, subscription")]
    InvalidPricingType,
    #[error("paid courses need a positive price")]
    InvalidPrice,
    #[error("at most {MAX_TAGS} tags are allowed")]
    TooManyTags,
    #[error("lesson type must be one of video, article, quiz, exercise")]
    InvalidLessonType,
    #[error("duration must be between 0 and {MAX_LESSON_MINUTES} minutes")]
    InvalidDuration,
    #[error("Module not found")]
    ModuleNotFound,
    #[error("Lesson not found")]
    LessonNotFound,
    #[error("A course needs at least one lesson before it can be published")]
    NoLessons,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInput {
    #[serde(rename = "type")]
    pub pricing_type: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseRequest {
    pub title: Option<String>,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub level: Option<String>,
    pub pricing: Option<PricingInput>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub level: Option<String>,
    pub pricing: Option<PricingInput>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModuleRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub lesson_type: Option<String>,
    pub duration: Option<i32>,
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub is_preview: bool,
}

fn validate_title(raw: Option<&str>) -> Result<String, AuthoringError> {
    let title = raw.map(str::trim).unwrap_or_default();
    let len = title.chars().count();
    if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) {
        return Err(AuthoringError::InvalidTitle);
    }
    Ok(title.to_string())
}

fn required_text(raw: Option<&str>, field: &'static str) -> Result<String, AuthoringError> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AuthoringError::MissingField(field))
}

fn validate_short_description(raw: Option<&str>) -> Result<String, AuthoringError> {
    let text = required_text(raw, "shortDescription")?;
    if text.chars().count() > MAX_SHORT_DESCRIPTION_CHARS {
        return Err(AuthoringError::ShortDescriptionTooLong);
    }
    Ok(text)
}

fn parse_uuid(raw: &str, err: AuthoringError) -> Result<Uuid, AuthoringError> {
    Uuid::parse_str(raw.trim()).map_err(|_| err)
}

fn validate_tags(tags: &[String]) -> Result<Vec<String>, AuthoringError> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
        if !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    if cleaned.len() > MAX_TAGS {
        return Err(AuthoringError::TooManyTags);
    }
    Ok(cleaned)
}

fn validate_pricing(input: Option<&PricingInput>) -> Result<Pricing, AuthoringError> {
    let Some(input) = input else {
        return Ok(Pricing {
            pricing_type: PricingType::Free,
            price: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
        });
    };

    let pricing_type = match input.pricing_type.as_deref() {
        Some(raw) => PricingType::parse(raw).ok_or(AuthoringError::InvalidPricingType)?,
        None => PricingType::Free,
    };
    let currency = input
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CURRENCY)
        .to_ascii_uppercase();

    let price = match pricing_type {
        PricingType::Free => 0.0,
        PricingType::Paid | PricingType::Subscription => {
            let price = input.price.unwrap_or(0.0);
            if !price.is_finite() || price <= 0.0 {
                return Err(AuthoringError::InvalidPrice);
            }
            price
        }
    };

    Ok(Pricing {
        pricing_type,
        price,
        currency,
    })
}

/// Everything needed to insert a course except its slug.
pub fn validate_create(
    request: &CreateCourseRequest,
    instructor_id: Uuid,
) -> Result<NewCourse, AuthoringError> {
    let title = validate_title(request.title.as_deref())?;
    let short_description = validate_short_description(request.short_description.as_deref())?;
    let description = required_text(request.description.as_deref(), "description")?;

    let category_raw = request
        .category
        .as_deref()
        .ok_or(AuthoringError::MissingField("category"))?;
    let category_id = parse_uuid(category_raw, AuthoringError::InvalidCategory)?;
    let subcategory_id = request
        .subcategory
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|raw| parse_uuid(raw, AuthoringError::InvalidSubcategory))
        .transpose()?;

    let level = match request.level.as_deref() {
        Some(raw) => CourseLevel::parse(raw).ok_or(AuthoringError::InvalidLevel)?,
        None => CourseLevel::Beginner,
    };

    Ok(NewCourse {
        slug: slugify(&title),
        title,
        short_description,
        description,
        thumbnail: request.thumbnail.clone().filter(|t| !t.trim().is_empty()),
        instructor_id,
        category_id,
        subcategory_id,
        tags: validate_tags(&request.tags)?,
        level,
        pricing: validate_pricing(request.pricing.as_ref())?,
    })
}

/// Applies the provided fields only. Returns the new category id when it changed.
pub fn apply_update(course: &mut Course, request: &UpdateCourseRequest) -> Result<Option<Uuid>, AuthoringError> {
    if request.title.is_some() {
        course.title = validate_title(request.title.as_deref())?;
    }
    if request.short_description.is_some() {
        course.short_description = validate_short_description(request.short_description.as_deref())?;
    }
    if request.description.is_some() {
        course.description = required_text(request.description.as_deref(), "description")?;
    }
    if let Some(thumbnail) = &request.thumbnail {
        course.thumbnail = Some(thumbnail.trim().to_string()).filter(|t| !t.is_empty());
    }

    let mut new_category = None;
    if let Some(raw) = &request.category {
        let id = parse_uuid(raw, AuthoringError::InvalidCategory)?;
        if course.category_id != Some(id) {
            new_category = Some(id);
        }
        course.category_id = Some(id);
    }
    if let Some(raw) = &request.subcategory {
        course.subcategory_id = if raw.trim().is_empty() {
            None
        } else {
            Some(parse_uuid(raw, AuthoringError::InvalidSubcategory)?)
        };
    }
    if let Some(raw) = &request.level {
        course.level = CourseLevel::parse(raw).ok_or(AuthoringError::InvalidLevel)?;
    }
    if let Some(pricing) = &request.pricing {
        course.pricing = validate_pricing(Some(pricing))?;
    }
    if let Some(tags) = &request.tags {
        course.tags = validate_tags(tags)?;
    }

    Ok(new_category)
}

pub fn append_module(content: &mut CourseContent, request: &CreateModuleRequest) -> Result<CourseModule, AuthoringError> {
    let module = CourseModule {
        id: Uuid::new_v4(),
        title: validate_title(request.title.as_deref())?,
        description: request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        order: content.modules.len() as i32,
        lessons: Vec::new(),
    };
    content.modules.push(module.clone());
    Ok(module)
}

/// Validates a lesson without touching any course.
pub fn build_lesson(request: &CreateLessonRequest) -> Result<Lesson, AuthoringError> {
    let title = validate_title(request.title.as_deref())?;
    let lesson_type = match request.lesson_type.as_deref() {
        Some(raw) => LessonType::parse(raw).ok_or(AuthoringError::InvalidLessonType)?,
        None => return Err(AuthoringError::MissingField("type")),
    };
    let duration = request.duration.unwrap_or(0);
    if !(0..=MAX_LESSON_MINUTES).contains(&duration) {
        return Err(AuthoringError::InvalidDuration);
    }

    Ok(Lesson {
        id: Uuid::new_v4(),
        slug: slugify(&title),
        title,
        lesson_type,
        duration,
        content: request.content.clone(),
        is_preview: request.is_preview,
        order: 0,
    })
}

/// Appends to the module and keeps the course totals in step.
pub fn append_lesson(
    content: &mut CourseContent,
    module_id: Uuid,
    mut lesson: Lesson,
) -> Result<Lesson, AuthoringError> {
    let module = content
        .modules
        .iter_mut()
        .find(|module| module.id == module_id)
        .ok_or(AuthoringError::ModuleNotFound)?;

    lesson.order = module.lessons.len() as i32;
    module.lessons.push(lesson.clone());

    content.total_lessons += 1;
    content.total_duration += lesson.duration;
    if lesson.lesson_type == LessonType::Quiz {
        content.total_quizzes += 1;
    }
    Ok(lesson)
}

pub fn publish(course: &mut Course, now: DateTime<Utc>) -> Result<(), AuthoringError> {
    if course.content.total_lessons <= 0 {
        return Err(AuthoringError::NoLessons);
    }
    course.status = CourseStatus::Published;
    if course.published_at.is_none() {
        course.published_at = Some(now);
    }
    Ok(())
}

/// `base` plus a short random hex suffix, used when `base` is taken.
pub fn slug_with_suffix(base: &str) -> String {
    let suffix: u32 = rand::rng().random::<u32>() & 0x00ff_ffff;
    if base.is_empty() {
        format!("course-{suffix:06x}")
    } else {
        format!("{base}-{suffix:06x}")
    }
}

/// Calls `insert` with `base`, then with suffixed variants, until it claims a
/// slug. `insert` yields `None` when the slug is already taken, so two
/// concurrent creates with one title both end up with a course.
pub async fn claim_unique_slug<T, E, F, Fut>(base: &str, retries: usize, mut insert: F) -> Result<Option<T>, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut candidate = if base.is_empty() {
        slug_with_suffix(base)
    } else {
        base.to_string()
    };
    for _ in 0..=retries {
        if let Some(claimed) = insert(candidate).await? {
            return Ok(Some(claimed));
        }
        candidate = slug_with_suffix(base);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::courses::CourseStats;

    fn create_request() -> CreateCourseRequest {
        CreateCourseRequest {
            title: Some("  Rust for Adventurers ".to_string()),
            short_description: Some("Learn Rust by questing".to_string()),
            description: Some("A long description".to_string()),
            category: Some(Uuid::new_v4().to_string()),
            level: Some("intermediate".to_string()),
            tags: vec!["Rust".to_string(), "rust".to_string(), " async ".to_string()],
            ..CreateCourseRequest::default()
        }
    }

    fn course() -> Course {
        let now = Utc::now();
        Course {
            id: Uuid::new_v4(),
            slug: "rust".to_string(),
            title: "Rust".to_string(),
            short_description: "short".to_string(),
            description: "long".to_string(),
            thumbnail: None,
            instructor_id: Uuid::new_v4(),
            category_id: None,
            subcategory_id: None,
            tags: Vec::new(),
            level: CourseLevel::Beginner,
            pricing: validate_pricing(None).unwrap(),
            status: CourseStatus::Draft,
            content: CourseContent::default(),
            stats: CourseStats::default(),
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn lesson_request(title: &str, lesson_type: &str, duration: i32) -> CreateLessonRequest {
        CreateLessonRequest {
            title: Some(title.to_string()),
            lesson_type: Some(lesson_type.to_string()),
            duration: Some(duration),
            ..CreateLessonRequest::default()
        }
    }

    #[test]
    fn create_normalizes_fields() {
        let new = validate_create(&create_request(), Uuid::new_v4()).unwrap();
        assert_eq!(new.title, "Rust for Adventurers");
        assert_eq!(new.slug, "rust-for-adventurers");
        assert_eq!(new.tags, vec!["rust".to_string(), "async".to_string()]);
        assert_eq!(new.level, CourseLevel::Intermediate);
        assert_eq!(new.pricing.pricing_type, PricingType::Free);
    }

    #[test]
    fn create_rejects_bad_input() {
        let mut request = create_request();
        request.title = Some("ab".to_string());
        assert_eq!(validate_create(&request, Uuid::new_v4()).unwrap_err(), AuthoringError::InvalidTitle);

        let mut request = create_request();
        request.category = Some("nope".to_string());
        assert_eq!(validate_create(&request, Uuid::new_v4()).unwrap_err(), AuthoringError::InvalidCategory);

        let mut request = create_request();
        request.tags = (0..11).map(|i| format!("tag{i}")).collect();
        assert_eq!(validate_create(&request, Uuid::new_v4()).unwrap_err(), AuthoringError::TooManyTags);

        let mut request = create_request();
        request.pricing = Some(PricingInput {
            pricing_type: Some("paid".to_string()),
            price: Some(0.0),
            currency: None,
        });
        assert_eq!(validate_create(&request, Uuid::new_v4()).unwrap_err(), AuthoringError::InvalidPrice);
    }

    #[test]
    fn update_only_touches_provided_fields() {
        let mut course = course();
        let category = Uuid::new_v4();
        let changed = apply_update(
            &mut course,
            &UpdateCourseRequest {
                level: Some("advanced".to_string()),
                category: Some(category.to_string()),
                ..UpdateCourseRequest::default()
            },
        )
        .unwrap();

        assert_eq!(changed, Some(category));
        assert_eq!(course.level, CourseLevel::Advanced);
        assert_eq!(course.title, "Rust");
    }

    #[test]
    fn lessons_update_totals_and_order() {
        let mut content = CourseContent::default();
        let module = append_module(
            &mut content,
            &CreateModuleRequest {
                title: Some("Basics".to_string()),
                description: None,
            },
        )
        .unwrap();
        assert_eq!(module.order, 0);

        let video = build_lesson(&lesson_request("Welcome aboard", "video", 12)).unwrap();
        let quiz = build_lesson(&lesson_request("Check yourself", "quiz", 5)).unwrap();
        append_lesson(&mut content, module.id, video).unwrap();
        let quiz = append_lesson(&mut content, module.id, quiz).unwrap();

        assert_eq!(quiz.order, 1);
        assert_eq!(quiz.slug, "check-yourself");
        assert_eq!(content.total_lessons, 2);
        assert_eq!(content.total_duration, 17);
        assert_eq!(content.total_quizzes, 1);

        let orphan = build_lesson(&lesson_request("Lost lesson", "article", 1)).unwrap();
        assert_eq!(
            append_lesson(&mut content, Uuid::new_v4(), orphan).unwrap_err(),
            AuthoringError::ModuleNotFound
        );
    }

    #[test]
    fn lesson_validation() {
        assert_eq!(
            build_lesson(&lesson_request("Reading", "podcast", 5)).unwrap_err(),
            AuthoringError::InvalidLessonType
        );
        assert_eq!(
            build_lesson(&lesson_request("Reading", "article", -1)).unwrap_err(),
            AuthoringError::InvalidDuration
        );
    }

    #[test]
    fn publishing_requires_lessons() {
        let mut course = course();
        assert_eq!(publish(&mut course, Utc::now()).unwrap_err(), AuthoringError::NoLessons);

        course.content.total_lessons = 1;
        let now = Utc::now();
        publish(&mut course, now).unwrap();
        assert_eq!(course.status, CourseStatus::Published);
        assert_eq!(course.published_at, Some(now));
    }

    #[test]
    fn suffixed_slug_keeps_base() {
        let slug = slug_with_suffix("rust-basics");
        assert!(slug.starts_with("rust-basics-"));
        assert_eq!(slug.len(), "rust-basics-".len() + 6);
        assert!(slug_with_suffix("").starts_with("course-"));
    }

    #[tokio::test]
    async fn taken_slug_falls_back_to_a_suffixed_one() {
        let taken = ["rust-basics".to_string()];
        let claimed = claim_unique_slug("rust-basics", 3, |slug| {
            let free = !taken.contains(&slug);
            async move { Ok::<_, ()>(free.then_some(slug)) }
        })
        .await
        .unwrap()
        .unwrap();

        assert_ne!(claimed, "rust-basics");
        assert!(claimed.starts_with("rust-basics-"));
    }

    #[tokio::test]
    async fn free_slug_is_claimed_as_is_and_exhaustion_yields_none() {
        let claimed = claim_unique_slug("rust-basics", 3, |slug| async move { Ok::<_, ()>(Some(slug)) })
            .await
            .unwrap();
        assert_eq!(claimed.as_deref(), Some("rust-basics"));

        let mut calls = 0;
        let none = claim_unique_slug("rust-basics", 2, |_slug| {
            calls += 1;
            async { Ok::<Option<String>, ()>(None) }
        })
        .await
        .unwrap();
        assert!(none.is_none());
        assert_eq!(calls, 3);
    }
}
