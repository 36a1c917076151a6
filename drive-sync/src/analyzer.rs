//! Recursive folder tree analysis under a depth bound

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use drive_core::{ApiKey, FolderProvider, ProviderError, RemoteEntry};

use crate::error::{Result, SyncError};
use crate::tree::{FileRef, FolderTree, NodeId, TreeStatistics};

/// Output of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub root_folder_id: String,
    pub root_folder_name: String,
    pub max_depth: usize,
    pub folder_structure: FolderTree,
    pub statistics: TreeStatistics,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Outcome of a cheap, non-recursive access probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessReport {
    pub accessible: bool,
    /// Drive API keys only reach link-shared content, so any successful
    /// listing through this engine means the folder is public.
    pub public: bool,
    pub file_count: usize,
    pub folder_count: usize,
    pub files_sample: Vec<String>,
    pub folder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccessReport {
    fn denied(folder_name: Option<String>, error: impl ToString) -> Self {
        Self {
            accessible: false,
            public: false,
            file_count: 0,
            folder_count: 0,
            files_sample: Vec::new(),
            folder_name,
            error: Some(error.to_string()),
        }
    }
}

/// Walks a remote folder tree through a [`FolderProvider`]
#[derive(Clone)]
pub struct FolderAnalyzer {
    provider: Arc<dyn FolderProvider>,
    listing_concurrency: usize,
}

impl FolderAnalyzer {
    pub fn new(provider: Arc<dyn FolderProvider>, listing_concurrency: usize) -> Self {
        Self {
            provider,
            listing_concurrency: listing_concurrency.max(1),
        }
    }

    /// Build the folder tree below `root_id`.
    ///
    /// Folders of one depth level are listed concurrently but attached in
    /// tree order, so a folder with several parents always lands under the
    /// same one. A folder found at depth `max_depth` is kept but marked
    /// truncated and never listed. Only a failure on the root aborts the
    /// analysis; any other unreadable folder carries its error and the walk
    /// goes on. Cancellation stops the walk between listings.
    #[instrument(skip(self, credential, cancel))]
    pub async fn analyze(
        &self,
        root_id: &str,
        credential: Option<&ApiKey>,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let root = self
            .provider
            .folder(root_id, credential)
            .await
            .map_err(|e| root_error(root_id, e))?;
        let mut tree = FolderTree::new(root.id.clone(), root.name.clone());
        let root_node = tree.root();
        let mut seen: HashSet<String> = HashSet::from([root.id.clone()]);

        let mut frontier = Vec::new();
        if max_depth == 0 {
            tree.node_mut(root_node).truncated = true;
        } else {
            let children = self
                .provider
                .list_children(root_id, credential)
                .await
                .map_err(|e| root_error(root_id, e))?;
            frontier = attach(&mut tree, root_node, children, max_depth, &mut seen);
        }

        while !frontier.is_empty() {

            let batch: Vec<(NodeId, String)> = frontier
                .iter()
                .map(|node| (*node, tree.node(*node).id.clone()))
                .collect();
            debug!(folders = batch.len(), "Listing folder level");

            let provider = &self.provider;
            let listings: Vec<(NodeId, std::result::Result<Vec<RemoteEntry>, ProviderError>)> =
                stream::iter(batch)
                    .map(|(node, folder_id)| async move {
                        (node, provider.list_children(&folder_id, credential).await)
                    })
                    .buffered(self.listing_concurrency)
                    .take_until(cancel.cancelled())
                    .collect()
                    .await;
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut next = Vec::new();
            for (node, listing) in listings {
                match listing {
                    Ok(children) => {
                        next.extend(attach(&mut tree, node, children, max_depth, &mut seen));
                    }
                    Err(e) => {
                        warn!(folder_id = %tree.node(node).id, error = %e, "Folder not accessible, skipping");
                        tree.node_mut(node).access_error = Some(e.to_string());
                    }
                }
            }
            frontier = next;
        }

        tree.sort();
        let statistics = tree.statistics();
        let elapsed = started.elapsed();

        info!(
            total_folders = statistics.total_folders,
            total_files = statistics.total_files,
            elapsed_ms = elapsed.as_millis() as u64,
            "Folder analysis complete"
        );

        Ok(AnalysisResult {
            root_folder_id: root.id,
            root_folder_name: root.name,
            max_depth,
            folder_structure: tree,
            statistics,
            elapsed,
        })
    }

    /// List only the immediate children of a folder. Creates no job.
    #[instrument(skip(self, credential))]
    pub async fn test_access(
        &self,
        folder_id: &str,
        credential: Option<&ApiKey>,
        sample_size: usize,
    ) -> AccessReport {
        let folder = match self.provider.folder(folder_id, credential).await {
            Ok(folder) => folder,
            Err(e) => return AccessReport::denied(None, e),
        };

        match self.provider.list_children(folder_id, credential).await {
            Ok(children) => {
                let (folders, files): (Vec<_>, Vec<_>) =
                    children.into_iter().partition(RemoteEntry::is_folder);
                AccessReport {
                    accessible: true,
                    public: true,
                    file_count: files.len(),
                    folder_count: folders.len(),
                    files_sample: files.into_iter().take(sample_size).map(|f| f.name).collect(),
                    folder_name: Some(folder.name),
                    error: None,
                }
            }
            Err(e) => AccessReport::denied(Some(folder.name), e),
        }
    }
}

fn root_error(root_id: &str, error: ProviderError) -> SyncError {
    if error.is_access_denied() {
        SyncError::not_accessible(root_id, error)
    } else {
        SyncError::Provider(error)
    }
}

/// Add listed entries under `node`; returns the subfolders still to list.
fn attach(
    tree: &mut FolderTree,
    node: NodeId,
    mut children: Vec<RemoteEntry>,
    max_depth: usize,
    seen: &mut HashSet<String>,
) -> Vec<NodeId> {
    children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    let mut pending = Vec::new();
    for entry in children {
        if entry.is_folder() {
            // A folder reachable twice would make the walk cyclic
            if !seen.insert(entry.id.clone()) {
                debug!(folder_id = %entry.id, "Folder already visited");
                continue;
            }
            let child = tree.add_child(node, entry.id, entry.name);
            if tree.node(child).depth >= max_depth {
                tree.node_mut(child).truncated = true;
            } else {
                pending.push(child);
            }
        } else if entry.is_downloadable() {
            tree.add_file(node, FileRef::from_entry(&entry));
        } else {
            debug!(file_id = %entry.id, mime_type = %entry.mime_type, "Skipping non-downloadable entry");
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use drive_core::MemoryProvider;

    fn course() -> Arc<MemoryProvider> {
        let provider = MemoryProvider::new();
        provider
            .add_folder("root-000001", "Course", None)
            .add_folder("folder-a001", "A", Some("root-000001"))
            .add_folder("folder-b001", "B", Some("root-000001"))
            .add_folder("folder-a-deep", "Deep", Some("folder-a001"))
            .add_file("file-a1", "a1.pdf", "folder-a001", &b"a1"[..])
            .add_file("file-a2", "a2.pdf", "folder-a001", &b"a2"[..])
            .add_file("file-a3", "a3.pdf", "folder-a001", &b"a3"[..])
            .add_file("file-b1", "b1.pdf", "folder-b001", &b"b1"[..])
            .add_file("file-b2", "b2.pdf", "folder-b001", &b"b2"[..])
            .add_file("file-deep", "deep.pdf", "folder-a-deep", &b"deep"[..])
            .add_file_with_mime(
                "form-1",
                "Quiz",
                "root-000001",
                "application/vnd.google-apps.form",
                &b""[..],
            );
        Arc::new(provider)
    }

    #[tokio::test]
    async fn test_analyze_full_tree() {
        let analyzer = FolderAnalyzer::new(course(), 4);
        let result = analyzer
            .analyze("root-000001", None, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.root_folder_name, "Course");
        assert_eq!(result.statistics.total_folders, 4);
        assert_eq!(result.statistics.total_files, 6);
        assert_eq!(result.folder_structure.max_depth(), 2);
    }

    #[tokio::test]
    async fn test_depth_bound_truncates() {
        let analyzer = FolderAnalyzer::new(course(), 2);
        let result = analyzer
            .analyze("root-000001", None, 1, &CancellationToken::new())
            .await
            .unwrap();

        let tree = &result.folder_structure;
        assert_eq!(tree.max_depth(), 1);
        for (_, node) in tree.nodes().filter(|(_, n)| n.depth == 1) {
            assert!(node.truncated);
            assert!(node.files.is_empty());
        }
        assert_eq!(result.statistics.total_folders, 1);
        assert_eq!(result.statistics.total_files, 0);
    }

    #[tokio::test]
    async fn test_inaccessible_subfolder_is_recorded() {
        let provider = course();
        provider.deny("folder-b001");
        let analyzer = FolderAnalyzer::new(provider, 4);

        let result = analyzer
            .analyze("root-000001", None, 5, &CancellationToken::new())
            .await
            .unwrap();

        let tree = &result.folder_structure;
        let b = tree.find("folder-b001").unwrap();
        assert!(tree.node(b).access_error.is_some());
        assert!(tree.node(b).files.is_empty());

        let a = tree.find("folder-a001").unwrap();
        assert_eq!(tree.node(a).files.len(), 3);
        assert_eq!(result.statistics.total_files, 4);
        assert_eq!(result.statistics.total_folders, 3);
    }

    #[tokio::test]
    async fn test_inaccessible_root_fails_fast() {
        let provider = course();
        provider.deny("root-000001");
        let analyzer = FolderAnalyzer::new(provider, 4);

        let err = analyzer
            .analyze("root-000001", None, 5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotAccessible { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let analyzer = FolderAnalyzer::new(course(), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = analyzer.analyze("root-000001", None, 5, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn test_repeated_analysis_is_identical() {
        let analyzer = FolderAnalyzer::new(course(), 3);
        let cancel = CancellationToken::new();
        let first = analyzer.analyze("root-000001", None, 5, &cancel).await.unwrap();
        let second = analyzer.analyze("root-000001", None, 5, &cancel).await.unwrap();

        assert_eq!(
            serde_json::to_value(&first.folder_structure).unwrap(),
            serde_json::to_value(&second.folder_structure).unwrap()
        );
        assert_eq!(first.statistics, second.statistics);
    }

    /// Shared folder linked under both A and B, with one parent's listing
    /// held back
    fn multi_parent(slow_parent: &str) -> Arc<MemoryProvider> {
        let provider = MemoryProvider::new();
        provider
            .add_folder("root-000001", "Root", None)
            .add_folder("folder-a001", "A", Some("root-000001"))
            .add_folder("folder-b001", "B", Some("root-000001"))
            .add_folder("shared-0001", "Shared", Some("folder-a001"))
            .link("shared-0001", "folder-b001")
            .add_file("file-s1", "notes.txt", "shared-0001", &b"shared"[..])
            .slow_listing(slow_parent, Duration::from_millis(60));
        Arc::new(provider)
    }

    #[tokio::test]
    async fn test_multi_parent_folder_placement_is_stable() {
        let cancel = CancellationToken::new();
        let a_slow = FolderAnalyzer::new(multi_parent("folder-a001"), 4)
            .analyze("root-000001", None, 5, &cancel)
            .await
            .unwrap();
        let b_slow = FolderAnalyzer::new(multi_parent("folder-b001"), 4)
            .analyze("root-000001", None, 5, &cancel)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&a_slow.folder_structure).unwrap(),
            serde_json::to_value(&b_slow.folder_structure).unwrap()
        );

        let tree = &a_slow.folder_structure;
        let shared = tree.node(tree.find("shared-0001").unwrap());
        assert_eq!(shared.path, std::path::PathBuf::from("Root/A/Shared"));
        assert_eq!(a_slow.statistics.total_files, 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_wide_level() {
        let provider = MemoryProvider::new().with_latency(Duration::from_millis(50));
        provider.add_folder("root-000001", "Root", None);
        for n in 0..20 {
            provider.add_folder(&format!("folder-{:06}", n), &format!("F{:02}", n), Some("root-000001"));
        }
        let provider = Arc::new(provider);
        let analyzer = FolderAnalyzer::new(provider.clone(), 1);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = analyzer.analyze("root-000001", None, 5, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(700));
        assert!(provider.listing_count() < 21);
    }

    #[tokio::test]
    async fn test_access_probe() {
        let analyzer = FolderAnalyzer::new(course(), 4);

        let report = analyzer.test_access("folder-a001", None, 2).await;
        assert!(report.accessible);
        assert!(report.public);
        assert_eq!(report.file_count, 3);
        assert_eq!(report.folder_count, 1);
        assert_eq!(report.files_sample.len(), 2);
        assert_eq!(report.folder_name.as_deref(), Some("A"));

        let missing = analyzer.test_access("no-such-folder", None, 2).await;
        assert!(!missing.accessible);
        assert!(missing.error.is_some());
    }
}
