use proptest::prelude::*;
use proptest::sample::Index;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use drive_core::MemoryProvider;

use crate::analyzer::FolderAnalyzer;

/// Random folder tree: each folder after the root picks an earlier folder as
/// parent, each file picks any folder.
#[derive(Debug, Clone)]
struct Shape {
    parents: Vec<Index>,
    files: Vec<Index>,
}

fn shape() -> impl Strategy<Value = Shape> {
    (
        prop::collection::vec(any::<Index>(), 0..25),
        prop::collection::vec(any::<Index>(), 0..40),
    )
        .prop_map(|(parents, files)| Shape { parents, files })
}

fn folder_id(n: usize) -> String {
    format!("folder-{:06}", n)
}

impl Shape {
    fn folder_count(&self) -> usize {
        self.parents.len() + 1
    }

    fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0];
        for (i, parent) in self.parents.iter().enumerate() {
            let parent = parent.index(i + 1);
            depths.push(depths[parent] + 1);
        }
        depths
    }

    fn provider(&self) -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.add_folder(&folder_id(0), "Root", None);
        for (i, parent) in self.parents.iter().enumerate() {
            let parent = parent.index(i + 1);
            provider.add_folder(&folder_id(i + 1), &format!("Folder {}", i + 1), Some(&folder_id(parent)));
        }
        for (n, folder) in self.files.iter().enumerate() {
            let folder = folder.index(self.folder_count());
            provider.add_file(
                &format!("file-{:06}", n),
                "same name.txt",
                &folder_id(folder),
                bytes::Bytes::from(format!("content {}", n)),
            );
        }
        provider
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_depth_bound_holds(shape in shape(), max_depth in 1usize..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let analyzer = FolderAnalyzer::new(Arc::new(shape.provider()), 3);
        let result = runtime
            .block_on(analyzer.analyze(&folder_id(0), None, max_depth, &CancellationToken::new()))
            .unwrap();
        let tree = &result.folder_structure;
        let depths = shape.depths();

        for (_, node) in tree.nodes() {
            prop_assert!(node.depth <= max_depth);
            prop_assert_eq!(node.truncated, node.depth == max_depth);
            if node.truncated {
                prop_assert!(node.children.is_empty());
                prop_assert!(node.files.is_empty());
            }

            let names: std::collections::HashSet<&str> =
                node.files.iter().map(|f| f.local_name.as_str()).collect();
            prop_assert_eq!(names.len(), node.files.len());
        }

        let visible = depths.iter().filter(|d| **d <= max_depth).count();
        prop_assert_eq!(tree.len(), visible);

        let listed: Vec<bool> = depths.iter().map(|d| *d < max_depth).collect();
        let expected_folders = listed.iter().filter(|l| **l).count();
        let expected_files = shape
            .files
            .iter()
            .filter(|f| listed[f.index(shape.folder_count())])
            .count();
        prop_assert_eq!(result.statistics.total_folders, expected_folders);
        prop_assert_eq!(result.statistics.total_files, expected_files);
        prop_assert_eq!(tree.files().len(), expected_files);
    }
}
