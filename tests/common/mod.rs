use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;

pub async fn create_test_app() -> Router {
    std::env::set_var("NODE_ENV", "test");
    std::env::set_var("DATABASE_URL", "");
    std::env::remove_var("LLM_API_KEY");

    academy_backend::create_app().await
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
