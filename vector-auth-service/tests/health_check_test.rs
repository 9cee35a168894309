mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp};

#[tokio::test]
async fn health_check_returns_200() {
    let app = TestApp::spawn().await;

    let response = app.get("/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vector-auth-service-test");
    assert_eq!(body["strategies"][0], "google");
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::spawn().await;

    let response = app.get("/health", None).await;

    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = TestApp::spawn().await;

    let response = app.get("/.well-known/openapi.json", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/users/me"].is_object());
    assert!(body["paths"]["/auth/{strategy}/callback"].is_object());
}

#[tokio::test]
async fn metrics_endpoint_exports_login_counter() {
    vector_auth_service::services::metrics::init_metrics();
    let app = TestApp::spawn().await;
    app.login_with(common::GOOD_CODE).await;

    let response = app.get("/metrics", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("login_total"));
}
