//! HTTP contract tests for the API router.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use upscale_pipeline::app_state::AppState;
use upscale_pipeline::models::job::JobDescriptor;
use upscale_pipeline::routes::build_router;
use upscale_pipeline::services::auth::{Claims, TokenVerifier};
use upscale_pipeline::services::jobs::JobService;
use upscale_pipeline::services::memory::{MemoryJobQueue, MemoryStatusStore, MemoryStorage};
use upscale_pipeline::services::queue::JobConsumer;

const BOUNDARY: &str = "X-UPSCALE-TEST-BOUNDARY";
const JWT_SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    storage: Arc<MemoryStorage>,
    queue: MemoryJobQueue,
}

fn build_test_app(auth: Option<TokenVerifier>) -> TestApp {
    let storage = Arc::new(MemoryStorage::new());
    let queue = MemoryJobQueue::new();
    let status = Arc::new(MemoryStatusStore::new(Duration::from_secs(3600)));

    let jobs = JobService::new(
        storage.clone(),
        Arc::new(queue.clone()),
        status,
        "ai-upscaler-input",
        "ai-upscaler-output",
        3600,
    );
    let prometheus = Arc::new(PrometheusBuilder::new().build_recorder().handle());
    let router = build_router(AppState::new(jobs, auth), prometheus, 1024 * 1024);

    TestApp {
        router,
        storage,
        queue,
    }
}

fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/upscale")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn get(app: &TestApp, uri: &str) -> Response {
    app.router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn token_for(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        email: Some(format!("{user}@example.com")),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn image_upload() -> Vec<u8> {
    multipart_body("file", "cat.png", "image/png", b"\x89PNG fake image bytes")
}

#[tokio::test]
async fn upload_returns_queued_job() {
    let app = build_test_app(None);

    let response = send(&app, upload_request(image_upload(), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    let job_id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(json["input_file"], "cat.png");

    let stored = app
        .storage
        .object("ai-upscaler-input", &format!("input/{job_id}/cat.png"))
        .unwrap();
    assert_eq!(stored.content_type, "image/png");
    assert_eq!(app.queue.ready_count(), 1);
}

#[tokio::test]
async fn status_of_new_job_is_queued() {
    let app = build_test_app(None);

    let json = body_json(send(&app, upload_request(image_upload(), None)).await).await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let response = get(&app, &format!("/status/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["job_id"], job_id);
    assert_eq!(status["status"], "queued");
    assert_eq!(status["filename"], "cat.png");
    assert!(status["created_at"].is_string());
}

#[tokio::test]
async fn status_of_unknown_job_is_404() {
    let app = build_test_app(None);

    let response = get(&app, &format!("/status/{}", Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Job not found");
}

#[tokio::test]
async fn status_with_malformed_id_is_400() {
    let app = build_test_app(None);

    let response = get(&app, "/status/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_returns_time_limited_url() {
    let app = build_test_app(None);
    let job_id = Uuid::new_v4();

    let response = get(&app, &format!("/download/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let url = json["download_url"].as_str().unwrap();
    assert!(url.contains(&format!("output/{job_id}/upscaled.jpg")));
    assert!(url.contains("expires_in=3600"));
}

#[tokio::test]
async fn upload_without_file_field_is_400() {
    let app = build_test_app(None);

    let body = multipart_body("attachment", "cat.png", "image/png", b"bytes");
    let response = send(&app, upload_request(body, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "No file provided");
    assert_eq!(app.queue.ready_count(), 0);
}

#[tokio::test]
async fn upload_with_empty_file_is_400() {
    let app = build_test_app(None);

    let body = multipart_body("file", "empty.png", "image/png", b"");
    let response = send(&app, upload_request(body, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.storage.keys("ai-upscaler-input").is_empty());
}

#[tokio::test]
async fn upload_over_limit_is_413_with_detail() {
    let app = build_test_app(None);

    let oversized = vec![0u8; 2 * 1024 * 1024];
    let body = multipart_body("file", "huge.png", "image/png", &oversized);
    let length = body.len();
    let mut request = upload_request(body, None);
    request
        .headers_mut()
        .insert(header::CONTENT_LENGTH, length.into());

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("File exceeds upload limit"), "{detail}");
    assert!(app.storage.keys("ai-upscaler-input").is_empty());
    assert_eq!(app.queue.ready_count(), 0);
}

#[tokio::test]
async fn storage_failure_is_500_with_detail() {
    let app = build_test_app(None);
    app.storage.fail_puts(true);

    let response = send(&app, upload_request(image_upload(), None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Upload failed"), "{detail}");
    assert!(detail.contains("injected put failure"), "{detail}");
    assert_eq!(app.queue.ready_count(), 0);
}

#[tokio::test]
async fn queue_failure_is_500_with_detail() {
    let app = build_test_app(None);
    app.queue.fail_publishes(true);

    let response = send(&app, upload_request(image_upload(), None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.starts_with("Queue publish failed"), "{detail}");
}

#[tokio::test]
async fn upload_requires_token_when_auth_enabled() {
    let app = build_test_app(Some(TokenVerifier::new(JWT_SECRET).unwrap()));

    let response = send(&app, upload_request(image_upload(), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["detail"],
        "Missing Authorization header"
    );

    let response = send(&app, upload_request(image_upload(), Some("garbage"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.queue.ready_count(), 0);
}

#[tokio::test]
async fn authenticated_upload_carries_user_id() {
    let app = build_test_app(Some(TokenVerifier::new(JWT_SECRET).unwrap()));

    let token = token_for("user-99");
    let response = send(&app, upload_request(image_upload(), Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut deliveries = app.queue.consume().await.unwrap();
    let delivery = deliveries.next().await.unwrap().unwrap();
    let descriptor = JobDescriptor::from_bytes(&delivery.payload).unwrap();
    assert_eq!(descriptor.user_id.as_deref(), Some("user-99"));
    assert_eq!(descriptor.content_type, "image/png");
}

#[tokio::test]
async fn health_reports_dependencies() {
    let app = build_test_app(None);

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["checks"]["status_store"]["status"], "ok");
    assert_eq!(json["checks"]["queue"]["status"], "ok");
}

#[tokio::test]
async fn health_is_503_when_queue_is_down() {
    let app = build_test_app(None);
    app.queue.fail_publishes(true);

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["queue"]["status"], "error");
    assert!(json["checks"]["queue"]["latency_ms"].is_null());
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let app = build_test_app(None);

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = build_test_app(None);

    let response = get(&app, "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
