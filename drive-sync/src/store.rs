//! Local destination for downloaded files

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Writes files under a download root, mirroring the remote folder layout
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute destination for a file of the analyzed tree
    pub fn path_for(&self, folder_path: &Path, local_name: &str) -> PathBuf {
        self.root.join(folder_path).join(local_name)
    }

    /// Write `content` to `path`, replacing any previous file atomically
    pub async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".part");
        let tmp = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| SyncError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::io(path, e))?;

        debug!(path = %path.display(), bytes = content.len(), "Wrote file");
        Ok(())
    }
}
