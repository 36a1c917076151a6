//! In-memory folder provider
//!
//! Backs tests and offline demos. Supports simulated permission errors,
//! transient and permanent download failures, an optional required API key,
//! multi-parent folders and per-call latency.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{ProviderError, Result};
use crate::provider::FolderProvider;
use crate::types::{ApiKey, RemoteEntry, FOLDER_MIME_TYPE};

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, RemoteEntry>,
    contents: HashMap<String, Bytes>,
    children: HashMap<String, Vec<String>>,
    denied: HashSet<String>,
    transient_failures: HashMap<String, u32>,
    broken: HashSet<String>,
    downloads: HashMap<String, u32>,
    listings: u32,
    listing_delays: HashMap<String, Duration>,
    required_key: Option<String>,
}

/// Folder tree held in memory
#[derive(Debug)]
pub struct MemoryProvider {
    state: RwLock<MemoryState>,
    latency: Option<Duration>,
    content_hashes: bool,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            latency: None,
            content_hashes: true,
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report no content checksums, like Drive does for exported documents
    pub fn without_content_hashes(mut self) -> Self {
        self.content_hashes = false;
        self
    }

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) -> &Self {
        let entry = RemoteEntry {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: 0,
            modified_time: Some(Self::base_time()),
            content_hash: None,
        };
        self.insert(entry, parent, None);
        self
    }

    pub fn add_file(&self, id: &str, name: &str, parent: &str, content: impl Into<Bytes>) -> &Self {
        self.add_file_with_mime(id, name, parent, "application/octet-stream", content)
    }

    pub fn add_file_with_mime(
        &self,
        id: &str,
        name: &str,
        parent: &str,
        mime_type: &str,
        content: impl Into<Bytes>,
    ) -> &Self {
        let content = content.into();
        let entry = RemoteEntry {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: content.len() as u64,
            modified_time: Some(Self::base_time()),
            content_hash: self.hash_of(&content),
        };
        self.insert(entry, Some(parent), Some(content));
        self
    }

    /// Replace a file's content and bump its modification time
    pub fn touch(&self, file_id: &str, content: impl Into<Bytes>) -> &Self {
        let content = content.into();
        let hash = self.hash_of(&content);
        let mut state = self.state.write();
        if let Some(entry) = state.entries.get_mut(file_id) {
            entry.size = content.len() as u64;
            entry.modified_time = entry
                .modified_time
                .map(|t| t + ChronoDuration::seconds(1));
            entry.content_hash = hash;
        }
        state.contents.insert(file_id.to_string(), content);
        self
    }

    /// Give an existing entry another parent, as Drive allows
    pub fn link(&self, entry_id: &str, parent: &str) -> &Self {
        self.state
            .write()
            .children
            .entry(parent.to_string())
            .or_default()
            .push(entry_id.to_string());
        self
    }

    /// Hold back listings of one folder
    pub fn slow_listing(&self, folder_id: &str, delay: Duration) -> &Self {
        self.state
            .write()
            .listing_delays
            .insert(folder_id.to_string(), delay);
        self
    }

    /// Make a folder unreadable
    pub fn deny(&self, folder_id: &str) -> &Self {
        self.state.write().denied.insert(folder_id.to_string());
        self
    }

    /// Fail the next `times` downloads of a file with a retryable error
    pub fn fail_downloads(&self, file_id: &str, times: u32) -> &Self {
        self.state
            .write()
            .transient_failures
            .insert(file_id.to_string(), times);
        self
    }

    /// Fail every download of a file with a permanent error
    pub fn break_download(&self, file_id: &str) -> &Self {
        self.state.write().broken.insert(file_id.to_string());
        self
    }

    /// Reject every call not carrying this key
    pub fn require_key(&self, key: &str) -> &Self {
        self.state.write().required_key = Some(key.to_string());
        self
    }

    pub fn download_count(&self, file_id: &str) -> u32 {
        self.state.read().downloads.get(file_id).copied().unwrap_or(0)
    }

    pub fn total_downloads(&self) -> u32 {
        self.state.read().downloads.values().sum()
    }

    pub fn listing_count(&self) -> u32 {
        self.state.read().listings
    }

    fn hash_of(&self, content: &[u8]) -> Option<String> {
        if !self.content_hashes {
            return None;
        }
        let digest = Sha256::digest(content);
        Some(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    fn insert(&self, entry: RemoteEntry, parent: Option<&str>, content: Option<Bytes>) {
        let mut state = self.state.write();
        if let Some(parent) = parent {
            state
                .children
                .entry(parent.to_string())
                .or_default()
                .push(entry.id.clone());
        }
        if let Some(content) = content {
            state.contents.insert(entry.id.clone(), content);
        }
        state.entries.insert(entry.id.clone(), entry);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_key(state: &MemoryState, id: &str, credential: Option<&ApiKey>) -> Result<()> {
        match &state.required_key {
            Some(required) if credential.map(ApiKey::as_str) != Some(required.as_str()) => {
                Err(ProviderError::PermissionDenied(id.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl FolderProvider for MemoryProvider {
    async fn folder(&self, folder_id: &str, credential: Option<&ApiKey>) -> Result<RemoteEntry> {
        self.simulate_latency().await;
        let state = self.state.read();
        Self::check_key(&state, folder_id, credential)?;
        if state.denied.contains(folder_id) {
            return Err(ProviderError::PermissionDenied(folder_id.to_string()));
        }
        state
            .entries
            .get(folder_id)
            .filter(|entry| entry.is_folder())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(folder_id.to_string()))
    }

    async fn list_children(
        &self,
        folder_id: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Vec<RemoteEntry>> {
        self.simulate_latency().await;
        let delay = self.state.read().listing_delays.get(folder_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.write();
        state.listings += 1;
        Self::check_key(&state, folder_id, credential)?;
        if state.denied.contains(folder_id) {
            return Err(ProviderError::PermissionDenied(folder_id.to_string()));
        }
        if !state.entries.contains_key(folder_id) {
            return Err(ProviderError::NotFound(folder_id.to_string()));
        }

        let children = state
            .children
            .get(folder_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(children)
    }

    async fn download(
        &self,
        file_id: &str,
        _mime_type: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Bytes> {
        self.simulate_latency().await;
        let mut state = self.state.write();
        Self::check_key(&state, file_id, credential)?;

        if state.broken.contains(file_id) {
            return Err(ProviderError::NotFound(file_id.to_string()));
        }
        if let Some(remaining) = state.transient_failures.get_mut(file_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::Transient(format!(
                    "simulated failure for {}",
                    file_id
                )));
            }
        }

        let content = state
            .contents
            .get(file_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(file_id.to_string()))?;
        *state.downloads.entry(file_id.to_string()).or_insert(0) += 1;
        Ok(content)
    }
}
