use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::db::operations::courses::{self, NewCourse};
use crate::middleware::auth::require_auth;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::routes::{body, db, parse_id, require_instructor};
use crate::services::course_authoring::{
    self, AuthoringError, CreateCourseRequest, CreateLessonRequest, CreateModuleRequest,
    UpdateCourseRequest,
};
use crate::state::AppState;

const SLUG_RETRIES: usize = 5;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/instructor/courses",
            get(list_courses).post(create_course),
        )
        .route("/api/v1/instructor/courses/:id", patch(update_course))
        .route("/api/v1/instructor/courses/:id/modules", post(create_module))
        .route(
            "/api/v1/instructor/courses/:id/modules/:module_id/lessons",
            post(create_lesson),
        )
        .route("/api/v1/instructor/courses/:id/publish", post(publish_course))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn authoring_error(err: AuthoringError) -> AppError {
    match err {
        AuthoringError::ModuleNotFound | AuthoringError::LessonNotFound => {
            AppError::not_found(err.to_string())
        }
        other => AppError::validation(other.to_string()),
    }
}

async fn list_courses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let proxy = db(&state)?;

    let courses = courses::list_by_instructor(proxy.as_ref(), user.id).await?;
    Ok(ok(courses).into_response())
}

async fn create_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateCourseRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let payload = body(payload)?;
    let mut new_course = course_authoring::validate_create(&payload, user.id).map_err(authoring_error)?;

    let proxy = db(&state)?;
    if !courses::category_exists(proxy.as_ref(), new_course.category_id).await? {
        return Err(AppError::validation("Category not found"));
    }

    let base = std::mem::take(&mut new_course.slug);
    let course = course_authoring::claim_unique_slug(&base, SLUG_RETRIES, |slug| {
        let candidate = NewCourse {
            slug,
            ..new_course.clone()
        };
        let proxy = proxy.clone();
        async move { courses::insert_course(proxy.as_ref(), &candidate).await }
    })
    .await?
    .ok_or_else(|| AppError::conflict("Could not derive a unique slug for this title"))?;

    tracing::info!(user_id = %user.id, course_id = %course.id, slug = %course.slug, "course created");
    Ok(created(course).into_response())
}

async fn update_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateCourseRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let course_id = parse_id(&id, "course")?;
    let payload = body(payload)?;
    let proxy = db(&state)?;

    let mut course = courses::find_owned(proxy.as_ref(), course_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;

    if let Some(category_id) = course_authoring::apply_update(&mut course, &payload).map_err(authoring_error)? {
        if !courses::category_exists(proxy.as_ref(), category_id).await? {
            return Err(AppError::validation("Category not found"));
        }
    }

    let course = courses::save_course_details(proxy.as_ref(), &course).await?;
    Ok(ok_with_message(course, "Course updated").into_response())
}

async fn create_module(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<CreateModuleRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let course_id = parse_id(&id, "course")?;
    let payload = body(payload)?;
    let proxy = db(&state)?;

    let module = courses::modify_content(proxy.as_ref(), course_id, user.id, |content| {
        course_authoring::append_module(content, &payload).map_err(authoring_error)
    })
    .await?
    .ok_or_else(|| AppError::not_found("Course not found"))?;

    Ok(created(module).into_response())
}

async fn create_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, module_id)): Path<(String, String)>,
    payload: Result<Json<CreateLessonRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let course_id = parse_id(&id, "course")?;
    let module_id = parse_id(&module_id, "module")?;
    let lesson = course_authoring::build_lesson(&body(payload)?).map_err(authoring_error)?;
    let proxy = db(&state)?;

    let lesson = courses::modify_content(proxy.as_ref(), course_id, user.id, |content| {
        course_authoring::append_lesson(content, module_id, lesson).map_err(authoring_error)
    })
    .await?
    .ok_or_else(|| AppError::not_found("Course not found"))?;

    Ok(created(lesson).into_response())
}

async fn publish_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    require_instructor(&user)?;
    let course_id = parse_id(&id, "course")?;
    let proxy = db(&state)?;

    let mut course = courses::find_owned(proxy.as_ref(), course_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;

    course_authoring::publish(&mut course, Utc::now()).map_err(authoring_error)?;
    let course = courses::save_course_details(proxy.as_ref(), &course).await?;

    tracing::info!(user_id = %user.id, course_id = %course.id, "course published");
    Ok(ok_with_message(course, "Course published").into_response())
}
