//! Drive Sync engine
//!
//! Mirrors a remote folder tree into a local directory:
//! - Depth-bounded folder tree analysis that tolerates unreadable subfolders
//! - A persistent duplicate index so unchanged files are fetched once
//! - Background jobs with progress snapshots, cancellation and timeouts
//! - A registry that evicts finished jobs and reclaims stuck ones

pub mod analyzer;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod registry;
pub mod retry;
pub mod store;
pub mod sync_engine;
pub mod tree;

#[cfg(test)]
mod tree_property_tests;

pub use analyzer::{AccessReport, AnalysisResult, FolderAnalyzer};
pub use dedup::{Claim, DuplicateIndex, IndexEntry};
pub use error::{Result, SyncError};
pub use fingerprint::Fingerprint;
pub use job::{JobId, JobStatistics, JobStatus, JobTiming, SyncJob};
pub use registry::{JobHandle, JobRegistry, RetentionPolicy, SweepReport};
pub use retry::RetryPolicy;
pub use store::LocalStore;
pub use sync_engine::{EngineOptions, SyncEngine, SyncRequest};
pub use tree::{FileRef, FolderNode, FolderTree, NodeId, TreeStatistics};
