//! Error types for the sync engine

use std::path::PathBuf;
use std::time::Duration;

use drive_core::ProviderError;

use crate::job::JobStatus;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the analyzer, the duplicate index and the job manager.
///
/// Partial access failures below the root and single-file transfer failures
/// never appear here: they are absorbed into the folder tree and the job
/// counters respectively.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed folder id or URL, rejected before any job exists
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Request parameter out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Root folder cannot be read with the given credential
    #[error("Folder '{folder_id}' is not accessible: {reason}")]
    NotAccessible { folder_id: String, reason: String },

    /// Provider failure outside the absorbed cases
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job exceeded the {0:?} time limit")]
    Timeout(Duration),

    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// IO errors
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cancellation observed by the worker
    #[error("Operation was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a new IO error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a root accessibility error
    pub fn not_accessible(folder_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::NotAccessible {
            folder_id: folder_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors the caller caused, as opposed to failures of the engine or the
    /// remote side
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidIdentifier(_) | SyncError::InvalidArgument(_)
        )
    }
}
