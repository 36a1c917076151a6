//! Folder tree produced by the analyzer
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The tree
//! serializes to the nested shape clients expect, with each node's children
//! keyed by folder id.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use drive_core::RemoteEntry;

use crate::fingerprint::Fingerprint;

/// Index of a node inside a [`FolderTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A downloadable file discovered during analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    /// Name as reported by the provider
    pub name: String,
    /// Name used on disk, unique within its folder
    pub local_name: String,
    pub size: u64,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub fingerprint: Fingerprint,
}

impl FileRef {
    pub fn from_entry(entry: &RemoteEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            local_name: sanitize_name(&entry.local_name()),
            size: entry.size,
            mime_type: entry.mime_type.clone(),
            modified_time: entry.modified_time,
            content_hash: entry.content_hash.clone(),
            fingerprint: Fingerprint::derive(
                &entry.id,
                entry.size,
                entry.modified_time.as_ref(),
                entry.content_hash.as_deref(),
            ),
        }
    }
}

/// One folder of the analyzed tree
#[derive(Debug, Clone)]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    /// Materialized path relative to the download root
    pub path: PathBuf,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub files: Vec<FileRef>,
    /// The depth bound stopped recursion here; children were not listed
    pub truncated: bool,
    pub access_error: Option<String>,
}

impl FolderNode {
    /// Whether this folder's children were actually listed
    pub fn is_listed(&self) -> bool {
        !self.truncated && self.access_error.is_none()
    }
}

/// Aggregate counts over successfully listed folders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStatistics {
    pub total_folders: usize,
    pub total_files: usize,
}

/// Arena-backed folder tree rooted at the analyzed folder
#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
}

impl FolderTree {
    pub fn new(root_id: impl Into<String>, root_name: impl Into<String>) -> Self {
        let name = root_name.into();
        let root = FolderNode {
            id: root_id.into(),
            path: PathBuf::from(sanitize_name(&name)),
            name,
            depth: 0,
            parent: None,
            children: Vec::new(),
            files: Vec::new(),
            truncated: false,
            access_error: None,
        };
        Self { nodes: vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &FolderNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut FolderNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &FolderNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn find(&self, folder_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.id == folder_id)
            .map(NodeId)
    }

    /// Attach a subfolder. Sibling folders whose names collide on disk get
    /// the start of their id appended.
    pub fn add_child(&mut self, parent: NodeId, id: impl Into<String>, name: impl Into<String>) -> NodeId {
        let id = id.into();
        let name = name.into();
        let parent_node = &self.nodes[parent.0];

        let taken = |component: &str| {
            parent_node
                .children
                .iter()
                .any(|child| self.nodes[child.0].path.file_name() == Some(OsStr::new(component)))
        };
        let mut component = sanitize_name(&name);
        if taken(&component) {
            let base = component;
            component = format!("{} ({})", base, short_id(&id));
            if taken(&component) {
                component = format!("{} ({})", base, id);
            }
        }

        let node = FolderNode {
            path: parent_node.path.join(component),
            depth: parent_node.depth + 1,
            id,
            name,
            parent: Some(parent),
            children: Vec::new(),
            files: Vec::new(),
            truncated: false,
            access_error: None,
        };

        let child = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(child);
        child
    }

    /// Attach a file, disambiguating its local name within the folder
    pub fn add_file(&mut self, folder: NodeId, mut file: FileRef) {
        let node = &mut self.nodes[folder.0];
        let taken: HashSet<&str> = node.files.iter().map(|f| f.local_name.as_str()).collect();
        if taken.contains(file.local_name.as_str()) {
            let mut local_name = disambiguate(&file.local_name, short_id(&file.id));
            if taken.contains(local_name.as_str()) {
                local_name = disambiguate(&file.local_name, &file.id);
            }
            file.local_name = local_name;
        }
        node.files.push(file);
    }

    /// Every file with the folder that holds it, depth-first from the root
    pub fn files(&self) -> Vec<(&FolderNode, &FileRef)> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            out.extend(node.files.iter().map(|file| (node, file)));
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(0)
    }

    /// Folder and file totals, accumulated bottom-up over listed folders
    pub fn statistics(&self) -> TreeStatistics {
        let mut totals = vec![TreeStatistics::default(); self.nodes.len()];

        // Children are always pushed after their parent, so a reverse scan
        // visits every child before its parent.
        for index in (0..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            if node.is_listed() {
                totals[index].total_folders += 1;
                totals[index].total_files += node.files.len();
            }
            if let Some(parent) = node.parent {
                let (folders, files) = (totals[index].total_folders, totals[index].total_files);
                totals[parent.0].total_folders += folders;
                totals[parent.0].total_files += files;
            }
        }

        totals.first().copied().unwrap_or_default()
    }

    /// Order children and files by name so repeated analyses serialize alike
    pub fn sort(&mut self) {
        for index in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[index].children);
            children.sort_by(|a, b| {
                let (a, b) = (&self.nodes[a.0], &self.nodes[b.0]);
                a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
            });
            self.nodes[index].children = children;
            self.nodes[index]
                .files
                .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        }
    }
}

impl Serialize for FolderTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NestedNode { tree: self, id: self.root() }.serialize(serializer)
    }
}

struct NestedNode<'a> {
    tree: &'a FolderTree,
    id: NodeId,
}

impl Serialize for NestedNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.tree.node(self.id);
        let mut state = serializer.serialize_struct("FolderNode", 8)?;
        state.serialize_field("id", &node.id)?;
        state.serialize_field("name", &node.name)?;
        state.serialize_field("path", &node.path)?;
        state.serialize_field("depth", &node.depth)?;
        state.serialize_field("truncated", &node.truncated)?;
        state.serialize_field("access_error", &node.access_error)?;
        state.serialize_field("files", &node.files)?;
        state.serialize_field("children", &Children { tree: self.tree, id: self.id })?;
        state.end()
    }
}

struct Children<'a> {
    tree: &'a FolderTree,
    id: NodeId,
}

impl Serialize for Children<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let children = &self.tree.node(self.id).children;
        let mut map = serializer.serialize_map(Some(children.len()))?;
        for child in children {
            let node = self.tree.node(*child);
            map.serialize_entry(&node.id, &NestedNode { tree: self.tree, id: *child })?;
        }
        map.end()
    }
}

/// Make a provider name safe as a single path component
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim();

    match cleaned {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}

fn short_id(id: &str) -> &str {
    let end = id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(id.len());
    &id[..end]
}

fn disambiguate(local_name: &str, tag: &str) -> String {
    let path = Path::new(local_name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{} ({}).{}", stem.to_string_lossy(), tag, ext.to_string_lossy()),
        _ => format!("{} ({})", local_name, tag),
    }
}
