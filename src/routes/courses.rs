use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::db::operations::courses::{self, CourseModule, CourseWithRefs, PricingType};
use crate::db::operations::enrollments::{self, Enrollment, EnrollmentProgress, QuizAttempt};
use crate::db::DatabaseProxy;
use crate::middleware::auth::{optional_auth, require_auth};
use crate::response::{created, ok, AppError};
use crate::routes::{body, db, parse_id};
use crate::services::course_query::{validate_course_query, CourseQueryParams, Pagination};
use crate::services::gamification::{
    self, BadgeDefinition, COURSE_COMPLETED_POINTS, LESSON_COMPLETED_POINTS, QUIZ_PASSED_POINTS,
};
use crate::services::progress::{self, QuizLessonError};
use crate::services::recommendation::{
    self, LearnerInterests, RecommendedCourse, CANDIDATE_FACTOR, DEFAULT_RECOMMENDATIONS,
    MAX_RECOMMENDATIONS,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/v1/courses", get(list_courses))
        .route("/api/v1/courses/:slug", get(course_detail))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let protected = Router::new()
        .route("/api/v1/courses/recommendations", get(recommendations))
        .route("/api/v1/courses/:slug/curriculum", get(curriculum))
        .route("/api/v1/courses/:slug/enroll", post(enroll))
        .route(
            "/api/v1/courses/:slug/lessons/:lesson_id/complete",
            post(complete_lesson),
        )
        .route(
            "/api/v1/courses/:slug/lessons/:lesson_id/quiz-attempts",
            post(quiz_attempt),
        )
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    public.merge(protected)
}

#[derive(Serialize)]
struct CourseList {
    courses: Vec<CourseWithRefs>,
    pagination: Pagination,
}

async fn list_courses(
    State(state): State<AppState>,
    Query(params): Query<CourseQueryParams>,
) -> Result<Response, AppError> {
    let query = validate_course_query(&params).map_err(|err| AppError::validation(err.to_string()))?;
    let proxy = db(&state)?;

    let (courses, total) = courses::list_published(proxy.as_ref(), &query).await?;
    let pagination = Pagination::new(query.page, query.limit, total);

    Ok(ok(CourseList { courses, pagination }).into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseDetail {
    course: CourseWithRefs,
    is_enrolled: bool,
    enrollment: Option<Enrollment>,
}

async fn course_detail(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    user: Option<Extension<AuthUser>>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let mut course = published_course(proxy.as_ref(), &slug).await?;

    let enrollment = match &user {
        Some(Extension(user)) => enrollments::find(proxy.as_ref(), user.id, course.course.id).await?,
        None => None,
    };
    let is_owner = user
        .as_ref()
        .is_some_and(|Extension(user)| user.id == course.course.instructor_id);

    if enrollment.is_none() && !is_owner {
        course.course.content.hide_locked_content();
    }

    Ok(ok(CourseDetail {
        course,
        is_enrolled: enrollment.is_some(),
        enrollment,
    })
    .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Curriculum {
    modules: Vec<CourseModule>,
    total_lessons: i32,
    total_duration: i32,
    total_quizzes: i32,
    progress: Option<EnrollmentProgress>,
}

async fn curriculum(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let course = published_course(proxy.as_ref(), &slug).await?.course;

    let enrollment = enrollments::find(proxy.as_ref(), user.id, course.id).await?;
    if enrollment.is_none() && course.pricing.pricing_type != PricingType::Free {
        return Err(AppError::forbidden("Enroll in this course to view its curriculum"));
    }

    let content = course.content;
    Ok(ok(Curriculum {
        modules: content.modules,
        total_lessons: content.total_lessons,
        total_duration: content.total_duration,
        total_quizzes: content.total_quizzes,
        progress: enrollment.map(|e| e.progress),
    })
    .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequired {
    requires_payment: bool,
    price: f64,
    currency: String,
    course_id: Uuid,
}

async fn enroll(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let proxy = db(&state)?;
    let course = published_course(proxy.as_ref(), &slug).await?.course;

    if enrollments::find(proxy.as_ref(), user.id, course.id).await?.is_some() {
        return Err(AppError::conflict("Already enrolled in this course"));
    }

    if course.pricing.pricing_type != PricingType::Free {
        return Ok(ok(PaymentRequired {
            requires_payment: true,
            price: course.pricing.price,
            currency: course.pricing.currency,
            course_id: course.id,
        })
        .into_response());
    }

    let Some(enrollment) = enrollments::create_free(proxy.as_ref(), user.id, course.id).await? else {
        return Err(AppError::conflict("Already enrolled in this course"));
    };

    tracing::info!(user_id = %user.id, course_id = %course.id, "enrolled in free course");
    Ok(created(enrollment).into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LessonCompleted {
    progress: EnrollmentProgress,
    completed: bool,
    certificate_id: Option<String>,
    points_awarded: i64,
    new_badges: Vec<BadgeDefinition>,
}

async fn complete_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((slug, lesson_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let lesson_id = parse_id(&lesson_id, "lesson")?;
    let proxy = db(&state)?;
    let course = published_course(proxy.as_ref(), &slug).await?.course;

    if enrollments::find(proxy.as_ref(), user.id, course.id).await?.is_none() {
        return Err(AppError::forbidden("You are not enrolled in this course"));
    }
    if course.content.find_lesson(lesson_id).is_none() {
        return Err(AppError::not_found("Lesson not found"));
    }

    let now = Utc::now();
    let Some((enrollment, outcome)) =
        enrollments::record_lesson_completion(proxy.as_ref(), user.id, &course, lesson_id, now).await?
    else {
        return Err(AppError::forbidden("You are not enrolled in this course"));
    };

    let mut points = 0;
    if outcome.lesson_newly_completed {
        points += LESSON_COMPLETED_POINTS;
    }
    if outcome.course_completed {
        points += COURSE_COMPLETED_POINTS;
        tracing::info!(user_id = %user.id, course_id = %course.id, "course completed");
    }
    let activity = gamification::record_activity(proxy.as_ref(), user.id, points, now).await?;

    Ok(ok(LessonCompleted {
        completed: enrollment.completed_at.is_some(),
        certificate_id: enrollment.certificate.certificate_id,
        progress: enrollment.progress,
        points_awarded: activity.points_awarded,
        new_badges: activity.new_badges,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuizAttemptRequest {
    score: f64,
    max_score: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuizAttemptRecorded {
    passed: bool,
    percentage: i32,
    attempts: usize,
    points_awarded: i64,
    new_badges: Vec<BadgeDefinition>,
}

async fn quiz_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((slug, lesson_id)): Path<(String, String)>,
    payload: Result<Json<QuizAttemptRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let lesson_id = parse_id(&lesson_id, "lesson")?;
    let payload = body(payload)?;
    progress::validate_quiz_score(payload.score, payload.max_score)
        .map_err(|err| AppError::validation(err.to_string()))?;

    let proxy = db(&state)?;
    let course = published_course(proxy.as_ref(), &slug).await?.course;
    progress::quiz_lesson(&course.content, lesson_id).map_err(|err| match err {
        QuizLessonError::NotFound => AppError::not_found(err.to_string()),
        QuizLessonError::NotAQuiz => AppError::bad_request(err.to_string()),
    })?;

    let now = Utc::now();
    let attempt = QuizAttempt {
        lesson_id,
        score: payload.score,
        max_score: payload.max_score,
        attempted_at: now,
    };
    let Some((enrollment, outcome)) =
        enrollments::record_quiz_attempt(proxy.as_ref(), user.id, course.id, attempt).await?
    else {
        return Err(AppError::forbidden("You are not enrolled in this course"));
    };

    let points = if outcome.first_pass { QUIZ_PASSED_POINTS } else { 0 };
    let activity = gamification::record_activity(proxy.as_ref(), user.id, points, now).await?;

    let attempts = enrollment
        .quiz_attempts
        .iter()
        .filter(|a| a.lesson_id == lesson_id)
        .count();

    Ok((
        StatusCode::CREATED,
        ok(QuizAttemptRecorded {
            passed: outcome.passed,
            percentage: outcome.percentage,
            attempts,
            points_awarded: activity.points_awarded,
            new_badges: activity.new_badges,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    limit: Option<String>,
}

#[derive(Serialize)]
struct Recommendations {
    recommendations: Vec<RecommendedCourse>,
    total: usize,
}

async fn recommendations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Response, AppError> {
    let limit = query
        .limit
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_RECOMMENDATIONS)
        .clamp(1, MAX_RECOMMENDATIONS);

    let proxy = db(&state)?;
    let enrolled = enrollments::list_for_user(proxy.as_ref(), user.id, None).await?;
    let exclude: Vec<Uuid> = enrolled.iter().map(|item| item.enrollment.course_id).collect();

    let candidates =
        courses::list_recommendation_candidates(proxy.as_ref(), &exclude, limit * CANDIDATE_FACTOR)
            .await?;
    let interests = LearnerInterests::from_enrollments(&enrolled);
    let ranked = recommendation::rank(candidates, &interests, limit as usize, Utc::now());

    Ok(ok(Recommendations {
        total: ranked.len(),
        recommendations: ranked,
    })
    .into_response())
}

async fn published_course(proxy: &DatabaseProxy, slug: &str) -> Result<CourseWithRefs, AppError> {
    courses::find_published_by_slug(proxy, slug)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))
}
