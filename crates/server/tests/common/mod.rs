//! Common test utilities for API testing with a mock engine.
//!
//! This module provides a test fixture that builds the router in-process
//! around a real SQLite store, an in-memory queue, a local object store in a
//! temp dir and the mock converter, so no ffmpeg is needed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use alphavid_core::config::LimitsConfig;
use alphavid_core::queue::MemoryTaskQueue;
use alphavid_core::storage::LocalObjectStore;
use alphavid_core::testing::MockConverter;
use alphavid_core::worker::WorkerConfig;
use alphavid_core::{Config, ConversionService, SqliteTaskStore, WorkerPool};
use alphavid_server::state::AppState;

const BOUNDARY: &str = "alphavid-test-boundary";

/// Test fixture for API testing with a mock converter.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_upload() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.upload(&[("a.mp4", b"video")]).await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock converter - control probe results and failures
    pub converter: Arc<MockConverter>,
    /// Worker pool, when enabled
    pub pool: Option<Arc<WorkerPool>>,
    /// Temporary directory for the database, objects and work files
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response with the raw body kept
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Start a worker pool so tasks are processed
    pub enable_workers: bool,
    pub limits: LimitsConfig,
}

impl TestConfig {
    /// Create config with workers enabled.
    pub fn with_workers() -> Self {
        Self {
            enable_workers: true,
            ..Default::default()
        }
    }

    pub fn with_limits(limits: LimitsConfig) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture without workers.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.database.path = temp_dir.path().join("test.db");
        config.storage.root = temp_dir.path().join("objects");
        config.limits = test_config.limits.clone();
        config.worker = WorkerConfig::default()
            .with_concurrency(2)
            .with_retry_backoff_ms(10)
            .with_work_dir(temp_dir.path().join("work"));
        config.worker.enabled = test_config.enable_workers;

        let store = Arc::new(
            SqliteTaskStore::new(&config.database.path).expect("Failed to create task store"),
        );
        let queue = Arc::new(MemoryTaskQueue::new());
        let objects = Arc::new(LocalObjectStore::new(config.storage.root.clone()));
        let converter = Arc::new(MockConverter::new());

        let service = Arc::new(ConversionService::new(
            config.limits.clone(),
            config.defaults.clone(),
            store.clone(),
            queue.clone(),
            objects.clone(),
            converter.clone(),
        ));

        let pool = if test_config.enable_workers {
            let pool = Arc::new(WorkerPool::new(
                config.worker.clone(),
                config.limits.clone(),
                store.clone(),
                queue.clone(),
                objects.clone(),
                converter.clone(),
            ));
            pool.start().await;
            Some(pool)
        } else {
            None
        };

        let state = Arc::new(AppState::new(config, service, pool.clone()));
        let router = alphavid_server::api::create_router(state);

        Self {
            router,
            converter,
            pool,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await.into_json()
    }

    /// Send a POST request with JSON body and keep the raw response body.
    pub async fn post_for_bytes(&self, path: &str, body: Value) -> RawResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// Upload files as multipart parts named `files`.
    pub async fn upload(&self, files: &[(&str, &[u8])]) -> TestResponse {
        let mut body = Vec::new();
        for (name, content) in files {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await.into_json()
    }

    /// Upload one file and return its ID.
    pub async fn upload_one(&self, name: &str) -> String {
        let response = self.upload(&[(name, &b"fake video payload"[..])]).await;
        assert_eq!(response.status, StatusCode::OK, "upload failed: {}", response.body);
        response.body[0]["fileId"]
            .as_str()
            .expect("fileId missing")
            .to_string()
    }

    /// Convert files with default options and return the task IDs.
    pub async fn convert(&self, file_ids: &[String]) -> Vec<String> {
        let response = self
            .post("/api/v1/convert", serde_json::json!({ "files": file_ids }))
            .await;
        assert_eq!(response.status, StatusCode::OK, "convert failed: {}", response.body);
        response.body["taskIds"]
            .as_array()
            .expect("taskIds missing")
            .iter()
            .map(|id| id.as_str().unwrap().to_string())
            .collect()
    }

    /// Polls the status endpoint until the task is SUCCESS or FAILED.
    pub async fn wait_terminal(&self, task_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self
                .get(&format!("/api/v1/status?taskId={}", task_id))
                .await;
            assert_eq!(response.status, StatusCode::OK);
            let status = response.body["status"].as_str().unwrap_or_default();
            if status == "SUCCESS" || status == "FAILED" {
                return response.body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {} stuck in {}",
                task_id,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a GET request and keep the raw body.
    pub async fn get_raw(&self, path: &str) -> RawResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await.into_json()
    }

    async fn send(&self, request: Request<Body>) -> RawResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        RawResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.stop().await;
        }
    }
}

impl RawResponse {
    fn into_json(self) -> TestResponse {
        let body: Value = if self.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        };
        TestResponse {
            status: self.status,
            body,
        }
    }
}
