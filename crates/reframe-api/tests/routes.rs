//! Router tests over the memory repository, memory queue and a local store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use reframe_api::error::ErrorResponse;
use reframe_api::{create_router, ApiConfig, AppState};
use reframe_jobs::{JobRepository, MemoryJobRepository};
use reframe_models::{Job, JobId, JobStatus, MediaAsset, StageResult};
use reframe_queue::{MemoryTaskQueue, TaskQueue};
use reframe_storage::{AssetStore, LocalAssetStore};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    router: Router,
    repo: Arc<dyn JobRepository>,
    queue: Arc<MemoryTaskQueue>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(ApiConfig {
            rate_limit_rps: 1000,
            rate_limit_burst: 1000,
            ..ApiConfig::default()
        })
    }

    fn with_config(config: ApiConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let store: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(dir.path()).unwrap());
        let state = AppState::new(config, repo.clone(), queue.clone(), store);
        Self {
            _dir: dir,
            router: create_router(state, None),
            repo,
            queue,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn json<T: DeserializeOwned>(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, T) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn upload(&self, data: &'static [u8], kind: &str, mime: &str) -> MediaAsset {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/assets?kind={kind}&mime={mime}"))
            .body(Body::from(data))
            .unwrap();
        let (status, _, bytes) = self.send(request).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body): (_, Value) = app.json(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body): (_, Value) = app.json(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_upload_then_fetch_and_download() {
    let app = TestApp::new();
    let asset = app.upload(b"1\n00:00:00,000 --> 00:00:01,000\nhi\n", "subtitle", "application/x-subrip").await;
    assert_eq!(asset.extension(), "srt");

    let (status, body): (_, Value) = app
        .json(Method::GET, &format!("/api/v1/assets/{}", asset.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], asset.id.to_string());
    assert_eq!(body["download_url"], format!("/api/v1/assets/{}/download", asset.id));

    let request = Request::builder()
        .uri(format!("/api/v1/assets/{}/download", asset.id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/x-subrip");
    assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().contains(".srt"));
    assert_eq!(bytes, b"1\n00:00:00,000 --> 00:00:01,000\nhi\n");
}

#[tokio::test]
async fn test_upload_rejects_unknown_kind_and_empty_body() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/assets?kind=hologram")
        .body(Body::from("x"))
        .unwrap();
    let (status, _, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error.code, "VALIDATION_ERROR");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/assets?kind=video")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_job_is_idempotent_per_dedupe_key() {
    let app = TestApp::new();
    let input = app.upload(b"video bytes", "video", "video/mp4").await;
    let body = json!({
        "job_type": "captions",
        "input_asset_ids": [input.id],
        "config": {"language": "en"},
        "dedupe_key": "client-req-1",
    });

    let (status, first): (_, Job) = app.json(Method::POST, "/api/v1/jobs", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first.status, JobStatus::Queued);
    assert_eq!(first.stages.len(), 2);

    let (_, second): (_, Job) = app.json(Method::POST, "/api/v1/jobs", Some(body)).await;
    assert_eq!(second.id, first.id);
    assert_eq!(app.queue.len().await.unwrap(), 1);

    let conflicting = json!({
        "job_type": "captions",
        "input_asset_ids": [input.id],
        "config": {"language": "de"},
        "dedupe_key": "client-req-1",
    });
    let (status, error): (_, ErrorResponse) = app.json(Method::POST, "/api/v1/jobs", Some(conflicting)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error.code, "CONFLICT");
}

#[tokio::test]
async fn test_create_job_validation_errors() {
    let app = TestApp::new();

    let missing_asset = json!({"job_type": "captions", "input_asset_ids": ["nope"]});
    let (status, error): (_, ErrorResponse) = app.json(Method::POST, "/api/v1/jobs", Some(missing_asset)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error.code, "VALIDATION_ERROR");
    assert!(error.detail.contains("nope"));

    let unknown_type = json!({"job_type": "teleport", "input_asset_ids": ["a"]});
    let (status, error): (_, ErrorResponse) = app.json(Method::POST, "/api/v1/jobs", Some(unknown_type)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error.code, "VALIDATION_ERROR");

    let input = app.upload(b"subs", "subtitle", "text/vtt").await;
    let no_target = json!({"job_type": "translate", "input_asset_ids": [input.id]});
    let (status, _): (_, ErrorResponse) = app.json(Method::POST, "/api/v1/jobs", Some(no_target)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_and_list_jobs() {
    let app = TestApp::new();
    let input = app.upload(b"subs", "subtitle", "text/vtt").await;
    let body = json!({
        "job_type": "translate",
        "input_asset_ids": [input.id],
        "config": {"target_language": "fr"},
    });
    let (_, created): (_, Job) = app.json(Method::POST, "/api/v1/jobs", Some(body)).await;

    let (status, fetched): (_, Job) = app
        .json(Method::GET, &format!("/api/v1/jobs/{}", created.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched.id, created.id);

    let (status, queued): (_, Vec<Job>) = app.json(Method::GET, "/api/v1/jobs?status=queued", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queued.len(), 1);

    let (_, completed): (_, Vec<Job>) = app.json(Method::GET, "/api/v1/jobs?status=completed", None).await;
    assert!(completed.is_empty());

    let (status, error): (_, ErrorResponse) = app.json(Method::GET, "/api/v1/jobs?status=bogus", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error.code, "VALIDATION_ERROR");

    let (status, error): (_, ErrorResponse) = app.json(Method::GET, "/api/v1/jobs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_running_and_finished_jobs() {
    let app = TestApp::new();
    let input = app.upload(b"subs", "subtitle", "text/vtt").await;
    let body = json!({
        "job_type": "translate",
        "input_asset_ids": [input.id],
        "config": {"target_language": "fr"},
    });

    // Running job: cancellation is recorded for the worker to honor.
    let (_, running): (_, Job) = app.json(Method::POST, "/api/v1/jobs", Some(body.clone())).await;
    app.repo.begin_attempt(&running.id, 0).await.unwrap();
    let (status, cancelled): (_, Job) = app
        .json(Method::POST, &format!("/api/v1/jobs/{}/cancel", running.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cancelled.cancel_requested);

    // Finished job: 409.
    let (_, done): (_, Job) = app.json(Method::POST, "/api/v1/jobs", Some(body)).await;
    app.repo.begin_attempt(&done.id, 0).await.unwrap();
    app.repo.advance(&done.id, 0, StageResult::new(Vec::new())).await.unwrap();
    let (status, error): (_, ErrorResponse) = app
        .json(Method::POST, &format!("/api/v1/jobs/{}/cancel", done.id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error.code, "CONFLICT");
    assert_eq!(app.repo.get(&done.id).await.unwrap().status, JobStatus::Completed);

    let (status, _): (_, ErrorResponse) = app
        .json(Method::POST, &format!("/api/v1/jobs/{}/cancel", JobId::new()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_style_presets() {
    let app = TestApp::new();
    let (status, presets): (_, Vec<Value>) = app.json(Method::GET, "/api/v1/presets/styles", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(presets.len(), 3);
    assert!(presets.iter().all(|p| p["name"].is_string()));
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let app = TestApp::with_config(ApiConfig {
        rate_limit_rps: 1,
        rate_limit_burst: 1,
        ..ApiConfig::default()
    });

    let (status, _): (_, Value) = app.json(Method::GET, "/api/v1/presets/styles", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, error): (_, ErrorResponse) = app.json(Method::GET, "/api/v1/presets/styles", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error.code, "RATE_LIMITED");

    // Health checks are not rate limited.
    let (status, _): (_, Value) = app.json(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = app.send(request).await;
    assert_eq!(headers["x-request-id"], "abc-123");

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, headers, _) = app.send(request).await;
    assert!(!headers["x-request-id"].is_empty());
}

#[tokio::test]
async fn test_unknown_route_uses_error_body() {
    let app = TestApp::new();
    let (status, error): (_, ErrorResponse) = app.json(Method::GET, "/api/v1/nothing-here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error.code, "NOT_FOUND");
}
