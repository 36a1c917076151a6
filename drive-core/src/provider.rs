//! Remote folder provider abstraction

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{ApiKey, RemoteEntry};

/// Source of folder listings and file bytes.
///
/// Implementations must be cheap to share across tasks; the sync engine holds
/// one behind an `Arc` and calls it from every running job.
#[async_trait]
pub trait FolderProvider: Send + Sync {
    /// Metadata of a single folder. Fails with `NotFound` or
    /// `PermissionDenied` when the credential cannot see it.
    async fn folder(&self, folder_id: &str, credential: Option<&ApiKey>) -> Result<RemoteEntry>;

    /// Immediate children of a folder, folders and files mixed.
    async fn list_children(
        &self,
        folder_id: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Vec<RemoteEntry>>;

    /// Bytes of a file. Google-native documents (recognised by `mime_type`)
    /// are exported first.
    async fn download(
        &self,
        file_id: &str,
        mime_type: &str,
        credential: Option<&ApiKey>,
    ) -> Result<Bytes>;
}
