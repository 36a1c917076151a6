//! Google Drive v3 REST client
//!
//! Listing and metadata calls are retried with exponential backoff on
//! transient failures. Downloads are attempted once; the caller owns the
//! download retry policy so attempts can be counted per file.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use bytes::Bytes;
use reqwest::{ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ProviderError, Result};
use crate::provider::FolderProvider;
use crate::types::{export_format_for, ApiKey, DriveFile, DriveQuery, FilesListResponse, RemoteEntry};

/// Public Drive API endpoint
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Largest page `files.list` accepts
const MAX_PAGE_SIZE: u32 = 1000;

const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,md5Checksum";

/// Google Drive API client
#[derive(Clone)]
pub struct DriveClient {
    http_client: reqwest::Client,
    base_url: String,
    retry_max_elapsed: Duration,
}

impl DriveClient {
    /// Create a client against `base_url` with reasonable defaults
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        DriveClientBuilder::new(base_url).build()
    }

    /// Create a client with a preconfigured HTTP client
    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `files.list` query selecting the live children of a folder
    pub fn children_query(folder_id: &str) -> String {
        format!(
            "'{}' in parents and trashed = false",
            folder_id.replace('\'', "\\'")
        )
    }

    fn url(&self, path: &str, query: &DriveQuery) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))?;
        let encoded = serde_urlencoded::to_string(query)
            .map_err(|e| ProviderError::Transient(format!("failed to encode query: {}", e)))?;
        if !encoded.is_empty() {
            url.set_query(Some(&encoded));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let operation = || async {
            let response = self.http_client.get(url.clone()).send().await?;
            handle_response(response).await
        };

        self.retry_operation(operation).await
    }

    async fn retry_operation<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(error) => {
                    if error.is_retryable() {
                        warn!("Retryable Drive error: {}", error);
                        match error.retry_after() {
                            Some(secs) => Err(backoff::Error::retry_after(
                                error,
                                Duration::from_secs(secs),
                            )),
                            None => Err(backoff::Error::transient(error)),
                        }
                    } else {
                        debug!("Non-retryable Drive error: {}", error);
                        Err(backoff::Error::permanent(error))
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl FolderProvider for DriveClient {
    async fn folder(&self, folder_id: &str, credential: Option<&ApiKey>) -> Result<RemoteEntry> {
        let query = DriveQuery::new()
            .fields(FILE_FIELDS)
            .all_drives()
            .key(credential);
        let url = self.url(&format!("files/{}", folder_id), &query)?;

        let file: DriveFile = self.get_json(url).await.map_err(|e| match e {
            ProviderError::NotFound(_) => ProviderError::NotFound(folder_id.to_string()),
            ProviderError::PermissionDenied(_) => {
                ProviderError::PermissionDenied(folder_id.to_string())
            }
            other => other,
        })?;

        Ok(file.into())
    }

    async fn list_children(
        &self,
        folder_id: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page_token = None;

        loop {
            let query = DriveQuery::new()
                .q(Self::children_query(folder_id))
                .fields(format!("nextPageToken,files({})", FILE_FIELDS))
                .page_size(MAX_PAGE_SIZE)
                .page_token(page_token.take())
                .list_all_drives()
                .key(credential);
            let url = self.url("files", &query)?;

            let page: FilesListResponse = self.get_json(url).await?;
            entries.extend(page.files.into_iter().map(RemoteEntry::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(folder_id, children = entries.len(), "Listed Drive folder");
        Ok(entries)
    }

    async fn download(
        &self,
        file_id: &str,
        mime_type: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Bytes> {
        let url = match export_format_for(mime_type) {
            Some(format) => {
                let query = DriveQuery::new()
                    .export_mime_type(format.mime_type)
                    .key(credential);
                self.url(&format!("files/{}/export", file_id), &query)?
            }
            None if mime_type.starts_with(crate::types::GOOGLE_APPS_PREFIX) => {
                return Err(ProviderError::Unsupported {
                    file_id: file_id.to_string(),
                    mime_type: mime_type.to_string(),
                });
            }
            None => {
                let query = DriveQuery::new().alt_media().all_drives().key(credential);
                self.url(&format!("files/{}", file_id), &query)?
            }
        };

        let response = self.http_client.get(url).send().await?;
        if response.status().is_success() {
            Ok(response.bytes().await?)
        } else {
            Err(parse_error_response(response).await)
        }
    }
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status().is_success() {
        let content: T = response.json().await?;
        Ok(content)
    } else {
        Err(parse_error_response(response).await)
    }
}

async fn parse_error_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    error_for_status(status, retry_after, body)
}

/// Map a non-success Drive response to a provider error.
///
/// Drive reports quota exhaustion as 403 with a `rateLimitExceeded` or
/// `userRateLimitExceeded` reason, which must stay retryable.
pub fn error_for_status(status: StatusCode, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit { retry_after },
        StatusCode::FORBIDDEN if body.contains("RateLimitExceeded") || body.contains("rateLimitExceeded") => {
            ProviderError::RateLimit { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::PermissionDenied(body),
        status => ProviderError::Server {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Builder for [`DriveClient`]
pub struct DriveClientBuilder {
    base_url: String,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    retry_max_elapsed: Option<Duration>,
}

impl DriveClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            connect_timeout: None,
            user_agent: None,
            retry_max_elapsed: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Upper bound on time spent retrying a single listing call
    pub fn retry_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.retry_max_elapsed = Some(elapsed);
        self
    }

    pub fn build(self) -> Result<DriveClient> {
        Url::parse(&self.base_url)?;

        let client_builder = ClientBuilder::new()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(10)))
            .user_agent(
                self.user_agent
                    .unwrap_or_else(|| concat!("drive-sync/", env!("CARGO_PKG_VERSION")).to_string()),
            );

        let http_client = client_builder.build().map_err(ProviderError::Network)?;

        let mut client = DriveClient::with_client(self.base_url, http_client);
        if let Some(elapsed) = self.retry_max_elapsed {
            client.retry_max_elapsed = elapsed;
        }
        Ok(client)
    }
}
