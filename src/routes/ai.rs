use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::operations::ai_generations::{self, HistoryItem, PgQuotaLedger};
use crate::db::operations::courses::{self, Course, CourseStatus};
use crate::middleware::auth::require_auth;
use crate::response::{json_error, ok, AppError};
use crate::routes::{body, db, parse_id, require_instructor, require_premium};
use crate::services::ai_quota::{self, DailyUsage};
use crate::services::instructor_ai::{
    self, ArticleRequest, GeneratedQuestion, ImproveRequest, InstructorAiError, OutlineRequest,
    PromptPair, QuestionsRequest,
};
use crate::services::llm_provider::{LlmError, ProviderInfo};
use crate::services::student_ai::{self, QuotaLedger, StudentGenerationError, StudentGenerationRequest};
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let student = Router::new()
        .route("/api/v1/ai/student/daily-usage/:course_id", get(daily_usage))
        .route("/api/v1/ai/student/generate", post(student_generate))
        .route("/api/v1/ai/student/history/:course_id", get(history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let authoring = Router::new()
        .route("/api/v1/ai/providers", get(providers))
        .route("/api/v1/ai/generate-article", post(generate_article))
        .route(
            "/api/v1/ai/generate-and-save-article",
            post(generate_and_save_article),
        )
        .route("/api/v1/ai/generate-questions", post(generate_questions))
        .route(
            "/api/v1/ai/generate-course-outline",
            post(generate_course_outline),
        )
        .route("/api/v1/ai/improve-article", post(improve_article))
        .route_layer(middleware::from_fn(require_premium_instructor))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    student.merge(authoring)
}

async fn require_premium_instructor(req: Request<Body>, next: Next) -> Response {
    let Some(user) = req.extensions().get::<AuthUser>() else {
        return AppError::unauthorized("Authentication required").into_response();
    };
    if let Err(err) = require_premium(user).and_then(|()| require_instructor(user)) {
        return err.into_response();
    }
    next.run(req).await
}

fn llm_error(err: LlmError) -> AppError {
    match err {
        LlmError::NotConfigured(what) => {
            tracing::warn!(missing = what, "AI provider not configured");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "AI_UNAVAILABLE",
                "AI generation is not available",
            )
        }
        other => {
            tracing::warn!(error = %other, "AI provider call failed");
            json_error(
                StatusCode::BAD_GATEWAY,
                "AI_GENERATION_FAILED",
                "AI generation failed, please try again",
            )
        }
    }
}

fn instructor_ai_error(err: InstructorAiError) -> AppError {
    match err {
        InstructorAiError::InvalidResponse(detail) => {
            tracing::warn!(detail = %detail, "unusable AI response");
            json_error(
                StatusCode::BAD_GATEWAY,
                "AI_GENERATION_FAILED",
                "The AI response could not be understood, please try again",
            )
        }
        other => AppError::validation(other.to_string()),
    }
}

async fn run_prompt(state: &AppState, prompt: &PromptPair) -> Result<String, AppError> {
    state
        .generator()
        .generate(&prompt.system, &prompt.user)
        .await
        .map_err(llm_error)
}

/// Both student quota endpoints only see published courses.
fn published_only(course: Option<Course>) -> Result<Course, AppError> {
    course
        .filter(|course| course.status == CourseStatus::Published)
        .ok_or_else(|| AppError::not_found("Course not found"))
}

async fn daily_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<Response, AppError> {
    let course_id = parse_id(&course_id, "course")?;
    let proxy = db(&state)?;

    published_only(courses::find_by_id(proxy.as_ref(), course_id).await?)?;

    let now = Utc::now();
    let ledger = PgQuotaLedger::new(proxy.as_ref());
    let used = ledger.used(user.id, course_id, ai_quota::quota_day(now)).await?;

    Ok(ok(DailyUsage::new(used, state.config().ai_daily_limit, now)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentGenerateRequest {
    course_id: String,
    prompt: String,
}

#[derive(Serialize)]
struct LimitReachedBody {
    success: bool,
    error: String,
    code: &'static str,
    data: DailyUsage,
}

async fn student_generate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<StudentGenerateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = body(payload)?;
    let course_id = parse_id(&payload.course_id, "course")?;
    ai_quota::normalize_prompt(&payload.prompt).map_err(|err| AppError::validation(err.to_string()))?;
    require_premium(&user)?;

    let proxy = db(&state)?;
    let course = published_only(courses::find_by_id(proxy.as_ref(), course_id).await?)?;

    let generator = state.generator();
    if !generator.is_available() {
        return Err(llm_error(LlmError::NotConfigured("LLM_API_KEY")));
    }

    let now = Utc::now();
    let limit = state.config().ai_daily_limit;
    let ledger = PgQuotaLedger::new(proxy.as_ref());
    let request = StudentGenerationRequest {
        user_id: user.id,
        course_id,
        course_title: &course.title,
        prompt: &payload.prompt,
    };

    match student_ai::generate_for_student(&ledger, generator.as_ref(), request, limit, now).await {
        Ok(generation) => Ok(ok(generation).into_response()),
        Err(StudentGenerationError::Prompt(err)) => Err(AppError::validation(err.to_string())),
        Err(StudentGenerationError::LimitReached(usage)) => {
            tracing::info!(user_id = %user.id, course_id = %course_id, "daily AI limit reached");
            let body = LimitReachedBody {
                success: false,
                error: format!(
                    "You have used all {} AI generations for this course today",
                    usage.limit
                ),
                code: "DAILY_LIMIT_REACHED",
                data: DailyUsage::new(usage.used, usage.limit, now),
            };
            Ok((StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response())
        }
        Err(StudentGenerationError::Generation(err)) => Err(llm_error(err)),
        Err(StudentGenerationError::Storage(err)) => Err(err.into()),
    }
}

#[derive(Serialize)]
struct History {
    history: Vec<HistoryItem>,
    total: usize,
}

async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(course_id): Path<String>,
) -> Result<Response, AppError> {
    let course_id = parse_id(&course_id, "course")?;
    let proxy = db(&state)?;

    let items = ai_generations::history(proxy.as_ref(), user.id, course_id).await?;
    Ok(ok(History {
        total: items.len(),
        history: items,
    })
    .into_response())
}

#[derive(Serialize)]
struct Providers {
    providers: Vec<ProviderInfo>,
    default: String,
}

async fn providers(State(state): State<AppState>) -> Response {
    let info = state.generator().provider_info();
    ok(Providers {
        default: info.name.clone(),
        providers: vec![info],
    })
    .into_response()
}

#[derive(Serialize)]
struct GeneratedContent {
    content: String,
}

async fn generate_article(
    State(state): State<AppState>,
    payload: Result<Json<ArticleRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let prompt = instructor_ai::article_prompt(&body(payload)?).map_err(instructor_ai_error)?;
    let content = run_prompt(&state, &prompt).await?;
    Ok(ok(GeneratedContent { content }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveArticleRequest {
    course_id: String,
    module_id: String,
    lesson_id: String,
    #[serde(flatten)]
    article: ArticleRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedArticle {
    content: String,
    lesson_id: uuid::Uuid,
}

async fn generate_and_save_article(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<SaveArticleRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let payload = body(payload)?;
    let course_id = parse_id(&payload.course_id, "course")?;
    let module_id = parse_id(&payload.module_id, "module")?;
    let lesson_id = parse_id(&payload.lesson_id, "lesson")?;
    let prompt = instructor_ai::article_prompt(&payload.article).map_err(instructor_ai_error)?;

    let proxy = db(&state)?;
    let owned = courses::find_owned(proxy.as_ref(), course_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    let lesson_exists = owned
        .content
        .modules
        .iter()
        .any(|module| module.id == module_id && module.lessons.iter().any(|l| l.id == lesson_id));
    if !lesson_exists {
        return Err(AppError::not_found("Lesson not found"));
    }

    let content = run_prompt(&state, &prompt).await?;

    let article = content.clone();
    courses::modify_content(proxy.as_ref(), course_id, user.id, |course_content| {
        let lesson = course_content
            .find_lesson_mut(module_id, lesson_id)
            .ok_or_else(|| AppError::not_found("Lesson not found"))?;
        instructor_ai::attach_article(lesson, article);
        Ok::<_, AppError>(())
    })
    .await?
    .ok_or_else(|| AppError::not_found("Course not found"))?;

    tracing::info!(user_id = %user.id, course_id = %course_id, lesson_id = %lesson_id, "generated article saved");
    Ok(ok(SavedArticle { content, lesson_id }).into_response())
}

#[derive(Serialize)]
struct GeneratedQuestions {
    questions: Vec<GeneratedQuestion>,
}

async fn generate_questions(
    State(state): State<AppState>,
    payload: Result<Json<QuestionsRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let (prompt, count) = instructor_ai::questions_prompt(&body(payload)?).map_err(instructor_ai_error)?;
    let raw = run_prompt(&state, &prompt).await?;
    let questions = instructor_ai::parse_questions(&raw, count).map_err(instructor_ai_error)?;
    Ok(ok(GeneratedQuestions { questions }).into_response())
}

#[derive(Serialize)]
struct GeneratedOutline {
    outline: serde_json::Value,
}

async fn generate_course_outline(
    State(state): State<AppState>,
    payload: Result<Json<OutlineRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let prompt = instructor_ai::outline_prompt(&body(payload)?).map_err(instructor_ai_error)?;
    let raw = run_prompt(&state, &prompt).await?;
    let outline = instructor_ai::parse_outline(&raw).map_err(instructor_ai_error)?;
    Ok(ok(GeneratedOutline { outline }).into_response())
}

async fn improve_article(
    State(state): State<AppState>,
    payload: Result<Json<ImproveRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let prompt = instructor_ai::improve_prompt(&body(payload)?).map_err(instructor_ai_error)?;
    let content = run_prompt(&state, &prompt).await?;
    Ok(ok(GeneratedContent { content }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::courses::{CourseContent, CourseLevel, CourseStats, Pricing, PricingType};

    fn course(status: CourseStatus) -> Course {
        let now = Utc::now();
        Course {
            id: uuid::Uuid::new_v4(),
            slug: "rust-basics".to_string(),
            title: "Rust Basics".to_string(),
            short_description: String::new(),
            description: String::new(),
            thumbnail: None,
            instructor_id: uuid::Uuid::new_v4(),
            category_id: None,
            subcategory_id: None,
            tags: Vec::new(),
            level: CourseLevel::Beginner,
            pricing: Pricing {
                pricing_type: PricingType::Free,
                price: 0.0,
                currency: "USD".to_string(),
            },
            status,
            content: CourseContent::default(),
            stats: CourseStats::default(),
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn quota_endpoints_hide_unpublished_courses() {
        assert!(published_only(Some(course(CourseStatus::Published))).is_ok());

        for hidden in [Some(course(CourseStatus::Draft)), Some(course(CourseStatus::Archived)), None] {
            let err = published_only(hidden).unwrap_err();
            assert_eq!(err.status(), StatusCode::NOT_FOUND);
            assert_eq!(err.code(), "NOT_FOUND");
        }
    }
}
