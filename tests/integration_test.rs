use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{body_json, get, json_request};

#[tokio::test]
async fn test_health_live() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/health/live")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_health_root_degraded_without_database() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_health_ready_without_database() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/health/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_info() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/health/info")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "academy-backend");
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/api/v1/does-not-exist")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_profile_requires_token() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/api/v1/users/profile")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_student_generation_requires_token() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/ai/student/generate",
            json!({ "courseId": "00000000-0000-0000-0000-000000000000", "prompt": "Explain closures" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_daily_usage_requires_token() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(get(
            "/api/v1/ai/student/daily-usage/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_instructor_ai_requires_token() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/ai/generate-article",
            json!({ "topic": "Ownership" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_without_database_is_unavailable() {
    let app = common::create_test_app().await;

    let request = axum::http::Request::builder()
        .uri("/api/v1/auth/me")
        .header("authorization", "Bearer not-a-real-token")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_register_rejects_invalid_email() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "email": "not-an-email",
                "password": "supersecret",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "email": "ada@example.com",
                "password": "short",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_malformed_body_is_validation_error() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({ "email": "ada@example.com" }),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_register_without_database_is_unavailable() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "email": "ada@example.com",
                "password": "supersecret",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_course_catalog_without_database_is_unavailable() {
    let app = common::create_test_app().await;

    let response = app.oneshot(get("/api/v1/courses")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_course_catalog_rejects_bad_level() {
    let app = common::create_test_app().await;

    let response = app
        .oneshot(get("/api/v1/courses?level=wizard"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
