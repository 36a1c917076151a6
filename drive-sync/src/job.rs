//! Sync job records and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Opaque, unguessable job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SyncError::JobNotFound(s.to_string()))
    }
}

/// Job lifecycle.
///
/// ```text
/// Analyzing -> Processing -> Completed
///     |            |
///     +--> Error <-+
///     +--> Cancelled <-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Analyzing,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Analyzing, Processing)
                | (Analyzing, Error)
                | (Analyzing, Cancelled)
                | (Processing, Completed)
                | (Processing, Error)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job counters.
///
/// Once processing ends, `downloaded_files + skipped_duplicates + errors`
/// equals `total_files` for a completed job and stays at or below it for a
/// cancelled or failed one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total_folders: usize,
    pub total_files: usize,
    pub downloaded_files: usize,
    pub skipped_duplicates: usize,
    pub errors: usize,
}

impl JobStatistics {
    pub fn processed(&self) -> usize {
        self.downloaded_files + self.skipped_duplicates + self.errors
    }
}

/// Phase durations in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTiming {
    pub analysis_time: Option<f64>,
    pub download_time: Option<f64>,
    pub total_time: Option<f64>,
}

/// One sync job as readers see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub status: JobStatus,
    pub root_folder_id: String,
    pub root_folder_name: Option<String>,
    pub max_depth: usize,
    pub force_redownload: bool,
    pub statistics: JobStatistics,
    pub timing: JobTiming,
    pub current_file: Option<String>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(id: JobId, root_folder_id: impl Into<String>, max_depth: usize, force_redownload: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Analyzing,
            root_folder_id: root_folder_id.into(),
            root_folder_name: None,
            max_depth,
            force_redownload,
            statistics: JobStatistics::default(),
            timing: JobTiming::default(),
            current_file: None,
            error_message: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `next`, refusing anything the state machine does not allow
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
            self.current_file = None;
        }
        Ok(())
    }

    /// Move to `Error` with a reason, unless already terminal
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}
