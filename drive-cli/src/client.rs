use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Fields of a progress snapshot the client acts on. The raw document is
/// kept for printing.
#[derive(Debug, Clone, Deserialize)]
pub struct Progress {
    pub status: String,
    #[serde(default)]
    pub downloaded_files: usize,
    #[serde(default)]
    pub skipped_duplicates: usize,
    #[serde(default)]
    pub errors: usize,
    #[serde(default)]
    pub total_files: usize,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "error" | "cancelled")
    }

    pub fn processed(&self) -> usize {
        self.downloaded_files + self.skipped_duplicates + self.errors
    }

    /// One-line summary for interactive polling
    pub fn summary(&self) -> String {
        let mut line = format!(
            "[{}] {}/{} files ({} downloaded, {} skipped, {} errors)",
            self.status,
            self.processed(),
            self.total_files,
            self.downloaded_files,
            self.skipped_duplicates,
            self.errors
        );
        if let Some(file) = &self.current_file {
            line.push_str(&format!(" {}", file));
        }
        line
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SyncParams {
    pub root_folder_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    pub force_redownload: bool,
}

/// Client for the sync control protocol
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(ClientError::Api { status, message })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.http.get(self.url(path)).query(query).send().await?;
        Self::decode(response).await
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/health", &[]).await
    }

    pub async fn test_access(&self, folder: &str, api_key: Option<&str>) -> Result<Value> {
        self.post(
            "/api/drive/test-access",
            &serde_json::json!({ "folder_id": folder, "api_key": api_key }),
        )
        .await
    }

    pub async fn analyze(&self, folder: &str, api_key: Option<&str>, max_depth: Option<usize>) -> Result<Value> {
        self.post(
            "/api/drive/analyze",
            &serde_json::json!({ "folder_id": folder, "api_key": api_key, "max_depth": max_depth }),
        )
        .await
    }

    /// Start a job and return its download id
    pub async fn start_sync(&self, params: &SyncParams) -> Result<String> {
        #[derive(Deserialize)]
        struct Started {
            download_id: String,
        }
        let started: Started = self.post("/api/drive/sync", params).await?;
        Ok(started.download_id)
    }

    pub async fn progress(&self, download_id: &str) -> Result<Value> {
        self.get("/api/drive/progress", &[("download_id", download_id)]).await
    }

    pub async fn cancel(&self, download_id: &str) -> Result<Value> {
        self.post(
            "/api/drive/cancel",
            &serde_json::json!({ "download_id": download_id }),
        )
        .await
    }

    pub async fn force_redownload(&self) -> Result<Value> {
        self.post("/api/drive/force-redownload", &serde_json::json!({})).await
    }

    pub async fn jobs(&self) -> Result<Value> {
        self.get("/api/drive/jobs", &[]).await
    }
}
