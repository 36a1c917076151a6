//! Sync control protocol over HTTP

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use drive_core::ApiKey;
use drive_sync::{
    JobId, JobStatistics, JobStatus, JobTiming, SyncEngine, SyncError, SyncJob, SyncRequest,
    TreeStatistics,
};

use crate::telemetry::ServerMetrics;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub metrics: ServerMetrics,
    /// Used when a request carries no key
    pub default_key: Option<ApiKey>,
}

impl AppState {
    fn credential(&self, requested: Option<String>) -> Option<ApiKey> {
        requested
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(ApiKey::new)
            .or_else(|| self.default_key.clone())
    }
}

/// Errors returned to protocol clients as `{"error": ...}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) => match e {
                SyncError::JobNotFound(_) => StatusCode::NOT_FOUND,
                SyncError::NotAccessible { .. } => StatusCode::FORBIDDEN,
                SyncError::Provider(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct TestAccessRequest {
    #[serde(alias = "folder_url")]
    pub folder_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub root_folder_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StartSyncRequest {
    #[serde(alias = "folder_id")]
    pub root_folder_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub force_redownload: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub download_id: String,
}

#[derive(Debug, Serialize)]
pub struct RootFolder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub statistics: TreeStatistics,
    pub folder_structure: drive_sync::FolderTree,
    pub root_folder: RootFolder,
    pub max_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct JobResult {
    pub statistics: JobStatistics,
    pub timing: JobTiming,
}

/// Progress snapshot in the flat shape clients poll for
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub download_id: JobId,
    pub status: JobStatus,
    pub downloaded_files: usize,
    pub skipped_duplicates: usize,
    pub errors: usize,
    pub total_files: usize,
    pub total_folders: usize,
    pub cancel_requested: bool,
    pub root_folder_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_folder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SyncJob> for ProgressResponse {
    fn from(job: SyncJob) -> Self {
        let result = (job.status == JobStatus::Completed).then(|| JobResult {
            statistics: job.statistics,
            timing: job.timing,
        });
        Self {
            download_id: job.id,
            status: job.status,
            downloaded_files: job.statistics.downloaded_files,
            skipped_duplicates: job.statistics.skipped_duplicates,
            errors: job.statistics.errors,
            total_files: job.statistics.total_files,
            total_folders: job.statistics.total_folders,
            cancel_requested: job.cancel_requested,
            root_folder_id: job.root_folder_id,
            root_folder_name: job.root_folder_name,
            current_file: job.current_file,
            result,
            error: job.error_message,
        }
    }
}

pub fn router(state: AppState, cors_permissive: bool, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/drive/test-access", post(test_access))
        .route("/api/drive/analyze", post(analyze))
        .route("/api/drive/sync", post(start_sync))
        .route("/api/drive/progress", get(progress))
        .route("/api/drive/cancel", post(cancel))
        .route("/api/drive/force-redownload", post(force_redownload))
        .route("/api/drive/jobs", get(jobs));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    let app = app.with_state(state).layer(TraceLayer::new_for_http());
    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_jobs": state.engine.registry().active_count(),
        "index_entries": state.engine.index().len(),
    }))
}

async fn test_access(
    State(state): State<AppState>,
    Json(request): Json<TestAccessRequest>,
) -> ApiResult<impl IntoResponse> {
    state.metrics.request("test_access");
    let credential = state.credential(request.api_key);
    let report = state
        .engine
        .test_access(&request.folder_id, credential.as_ref())
        .await?;
    Ok(Json(report))
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    state.metrics.request("analyze");
    let root = request
        .folder_id
        .or(request.root_folder_id)
        .ok_or_else(|| ApiError::BadRequest("folder_id is required".to_string()))?;
    let credential = state.credential(request.api_key);

    let analysis = state
        .engine
        .analyze(&root, credential.as_ref(), request.max_depth)
        .await?;

    Ok(Json(AnalyzeResponse {
        statistics: analysis.statistics,
        root_folder: RootFolder {
            id: analysis.root_folder_id,
            name: analysis.root_folder_name,
        },
        max_depth: analysis.max_depth,
        folder_structure: analysis.folder_structure,
    }))
}

async fn start_sync(
    State(state): State<AppState>,
    Json(request): Json<StartSyncRequest>,
) -> ApiResult<impl IntoResponse> {
    state.metrics.request("sync");
    let credential = state.credential(request.api_key);

    let id = state.engine.start(SyncRequest {
        root: request.root_folder_id,
        credential,
        max_depth: request.max_depth,
        force_redownload: request.force_redownload,
    })?;
    state.metrics.jobs_started_total.inc();

    Ok(Json(json!({ "status": "started", "download_id": id })))
}

fn job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse::<JobId>().map_err(ApiError::from)
}

async fn progress(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<ProgressResponse>> {
    state.metrics.request("progress");
    let id = job_id(&query.download_id)?;
    Ok(Json(state.engine.progress(&id)?.into()))
}

async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<JobQuery>,
) -> ApiResult<impl IntoResponse> {
    state.metrics.request("cancel");
    let id = job_id(&request.download_id)?;
    let status = state.engine.cancel(&id)?;

    let reported = if status.is_terminal() {
        status.as_str()
    } else {
        "cancelling"
    };
    Ok(Json(json!({ "status": reported, "download_id": id })))
}

async fn force_redownload(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.request("force_redownload");
    let existing = state.engine.arm_force_redownload();
    info!(existing_files = existing, "Force re-download requested");
    Json(json!({ "status": "armed", "existing_files_count": existing }))
}

async fn jobs(State(state): State<AppState>) -> Json<Vec<SyncJob>> {
    state.metrics.request("jobs");
    Json(state.engine.jobs())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render(&state.engine) {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use drive_core::MemoryProvider;
    use drive_sync::{DuplicateIndex, EngineOptions, LocalStore, RetryPolicy};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const ROOT: &str = "root-000001";

    struct TestApp {
        app: Router,
        _dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let provider = MemoryProvider::new();
        provider
            .add_folder(ROOT, "Course", None)
            .add_folder("folder-a001", "A", Some(ROOT))
            .add_folder("folder-b001", "B", Some(ROOT))
            .add_file("file-a1", "a1.pdf", "folder-a001", &b"a1"[..])
            .add_file("file-a2", "a2.pdf", "folder-a001", &b"a2"[..])
            .add_file("file-a3", "a3.pdf", "folder-a001", &b"a3"[..])
            .add_file("file-b1", "b1.pdf", "folder-b001", &b"b1"[..])
            .add_file("file-b2", "b2.pdf", "folder-b001", &b"b2"[..])
            .add_folder("private-0001", "Private", None)
            .deny("private-0001");

        let dir = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            Arc::new(provider),
            Arc::new(DuplicateIndex::in_memory()),
            LocalStore::new(dir.path()),
            EngineOptions {
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(2),
                },
                ..EngineOptions::default()
            },
        );
        let state = AppState {
            engine,
            metrics: ServerMetrics::new().unwrap(),
            default_key: None,
        };
        TestApp {
            app: router(state, true, true),
            _dir: dir,
        }
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_terminal(app: &Router, id: &str) -> Value {
        for _ in 0..1000 {
            let (status, body) = call(app, get(&format!("/api/drive/progress?download_id={}", id))).await;
            assert_eq!(status, StatusCode::OK);
            if matches!(body["status"].as_str(), Some("completed" | "error" | "cancelled")) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app();
        let (status, body) = call(&t.app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_access_endpoint() {
        let t = test_app();
        let (status, body) = call(
            &t.app,
            post("/api/drive/test-access", json!({ "folder_id": "folder-a001" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accessible"], true);
        assert_eq!(body["file_count"], 3);
        assert_eq!(body["folder_name"], "A");

        let (status, body) = call(
            &t.app,
            post("/api/drive/test-access", json!({ "folder_id": "private-0001" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accessible"], false);
        assert!(body["error"].is_string());

        let (status, body) = call(
            &t.app,
            post("/api/drive/test-access", json!({ "folder_id": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_analyze_endpoint() {
        let t = test_app();
        let (status, body) = call(
            &t.app,
            post(
                "/api/drive/analyze",
                json!({ "folder_id": "https://drive.google.com/drive/folders/root-000001", "max_depth": 5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statistics"]["total_folders"], 3);
        assert_eq!(body["statistics"]["total_files"], 5);
        assert_eq!(body["root_folder"]["id"], ROOT);
        assert_eq!(body["root_folder"]["name"], "Course");
        assert_eq!(body["folder_structure"]["children"]["folder-a001"]["files"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_analyze_errors() {
        let t = test_app();

        let (status, _) = call(
            &t.app,
            post("/api/drive/analyze", json!({ "root_folder_id": "private-0001" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &t.app,
            post("/api/drive/analyze", json!({ "folder_id": ROOT, "max_depth": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&t.app, post("/api/drive/analyze", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sync_lifecycle() {
        let t = test_app();

        let (status, body) = call(
            &t.app,
            post("/api/drive/sync", json!({ "root_folder_id": ROOT, "max_depth": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");
        let id = body["download_id"].as_str().unwrap().to_string();

        let done = wait_for_terminal(&t.app, &id).await;
        assert_eq!(done["status"], "completed");
        assert_eq!(done["downloaded_files"], 5);
        assert_eq!(done["skipped_duplicates"], 0);
        assert_eq!(done["total_folders"], 3);
        assert_eq!(done["result"]["statistics"]["total_files"], 5);
        assert!(done["result"]["timing"]["total_time"].is_number());

        let (_, body) = call(&t.app, post("/api/drive/force-redownload", json!({}))).await;
        assert_eq!(body["status"], "armed");
        assert_eq!(body["existing_files_count"], 5);

        let (_, body) = call(&t.app, post("/api/drive/sync", json!({ "root_folder_id": ROOT }))).await;
        let forced = wait_for_terminal(&t.app, body["download_id"].as_str().unwrap()).await;
        assert_eq!(forced["downloaded_files"], 5);

        let (_, body) = call(&t.app, post("/api/drive/sync", json!({ "root_folder_id": ROOT }))).await;
        let again = wait_for_terminal(&t.app, body["download_id"].as_str().unwrap()).await;
        assert_eq!(again["downloaded_files"], 0);
        assert_eq!(again["skipped_duplicates"], 5);

        let (_, jobs) = call(&t.app, get("/api/drive/jobs")).await;
        assert_eq!(jobs.as_array().unwrap().len(), 3);

        // Cancelling a finished job leaves it as it is
        let (status, body) = call(&t.app, post("/api/drive/cancel", json!({ "download_id": id }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn test_failed_job_reports_error() {
        let t = test_app();
        let (_, body) = call(
            &t.app,
            post("/api/drive/sync", json!({ "root_folder_id": "private-0001" })),
        )
        .await;
        let done = wait_for_terminal(&t.app, body["download_id"].as_str().unwrap()).await;
        assert_eq!(done["status"], "error");
        assert!(done["error"].is_string());
        assert!(done.get("result").is_none());
    }

    #[tokio::test]
    async fn test_sync_rejects_bad_input() {
        let t = test_app();
        let (status, body) = call(
            &t.app,
            post("/api/drive/sync", json!({ "root_folder_id": "bad id" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid identifier"));

        let (_, jobs) = call(&t.app, get("/api/drive/jobs")).await;
        assert!(jobs.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let t = test_app();
        let unknown = JobId::new().to_string();

        let (status, _) = call(&t.app, get(&format!("/api/drive/progress?download_id={}", unknown))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&t.app, get("/api/drive/progress?download_id=garbage")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&t.app, post("/api/drive/cancel", json!({ "download_id": unknown }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let t = test_app();
        call(&t.app, post("/api/drive/sync", json!({ "root_folder_id": ROOT }))).await;

        let response = t.app.clone().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("drive_sync_jobs_started_total 1"));
        assert!(text.contains("drive_sync_requests_total{endpoint=\"sync\"} 1"));
    }
}
