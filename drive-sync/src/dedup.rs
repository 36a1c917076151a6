//! Persistent duplicate index shared by all jobs
//!
//! Maps a file [`Fingerprint`] to where it was written locally. Concurrent
//! jobs serialize on a fingerprint through [`DuplicateIndex::claim`], so one
//! piece of content is fetched at most once no matter how many jobs see it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::fingerprint::Fingerprint;

const SHARD_COUNT: usize = 64;
const INDEX_VERSION: u32 = 1;

/// Where a fingerprint was materialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_id: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: BTreeMap<Fingerprint, IndexEntry>,
}

/// Exclusive hold on one fingerprint, taken before the index is consulted
/// and released after the download is recorded or abandoned.
#[derive(Debug)]
pub struct Claim {
    fingerprint: Fingerprint,
    existing: Option<IndexEntry>,
    _guard: OwnedMutexGuard<()>,
}

impl Claim {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Entry recorded for this fingerprint before the claim was taken
    pub fn existing(&self) -> Option<&IndexEntry> {
        self.existing.as_ref()
    }

    /// Whether the file has to be fetched. `force` bypasses the index.
    pub fn should_download(&self, force: bool) -> bool {
        force || self.existing.is_none()
    }
}

#[derive(Debug)]
pub struct DuplicateIndex {
    entries: Mutex<HashMap<Fingerprint, IndexEntry>>,
    shards: Vec<Arc<AsyncMutex<()>>>,
    path: Option<PathBuf>,
    persist_lock: AsyncMutex<()>,
}

impl DuplicateIndex {
    fn with_entries(entries: HashMap<Fingerprint, IndexEntry>, path: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(entries),
            shards: (0..SHARD_COUNT).map(|_| Arc::new(AsyncMutex::new(()))).collect(),
            path,
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Index that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::with_entries(HashMap::new(), None)
    }

    /// Load the index stored at `path`. A missing file yields an empty index
    /// that will be written there on the next [`persist`](Self::persist).
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let file: IndexFile = serde_json::from_slice(&raw)?;
                if file.version != INDEX_VERSION {
                    return Err(SyncError::InvalidArgument(format!(
                        "unsupported index version {} in {}",
                        file.version,
                        path.display()
                    )));
                }
                file.entries.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SyncError::io(&path, e)),
        };

        info!(path = %path.display(), entries = entries.len(), "Loaded duplicate index");
        Ok(Self::with_entries(entries, Some(path)))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn shard(&self, fingerprint: &Fingerprint) -> Arc<AsyncMutex<()>> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        self.shards[(hasher.finish() as usize) % self.shards.len()].clone()
    }

    /// Take exclusive hold of a fingerprint. Waits while another job holds
    /// the same one.
    pub async fn claim(&self, fingerprint: &Fingerprint) -> Claim {
        let guard = self.shard(fingerprint).lock_owned().await;
        let existing = self.entries.lock().get(fingerprint).cloned();
        Claim {
            fingerprint: fingerprint.clone(),
            existing,
            _guard: guard,
        }
    }

    /// Record a completed download and release the claim. Always overwrites,
    /// so a forced run refreshes the entry.
    pub fn record(&self, claim: Claim, entry: IndexEntry) {
        debug!(fingerprint = %claim.fingerprint, path = %entry.local_path.display(), "Recording synced file");
        self.entries.lock().insert(claim.fingerprint.clone(), entry);
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<IndexEntry> {
        self.entries.lock().get(fingerprint).cloned()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Write the index to its backing file, if it has one.
    ///
    /// The file is replaced atomically through a sibling temporary file.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _writer = self.persist_lock.lock().await;

        let file = IndexFile {
            version: INDEX_VERSION,
            entries: self
                .entries
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let raw = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|e| SyncError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::io(path, e))?;

        debug!(path = %path.display(), entries = file.entries.len(), "Persisted duplicate index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fp(n: u32) -> Fingerprint {
        Fingerprint::derive(&format!("file-{:08}", n), 10, None, None)
    }

    fn entry(name: &str) -> IndexEntry {
        IndexEntry {
            file_id: name.to_string(),
            local_path: PathBuf::from(name),
            size: 10,
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_claim_and_record() {
        let index = DuplicateIndex::in_memory();

        let claim = index.claim(&fp(1)).await;
        assert!(claim.should_download(false));
        index.record(claim, entry("a.pdf"));

        let claim = index.claim(&fp(1)).await;
        assert!(!claim.should_download(false));
        assert!(claim.should_download(true));
        assert_eq!(claim.existing().unwrap().local_path, PathBuf::from("a.pdf"));
        drop(claim);

        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_claim_records_nothing() {
        let index = DuplicateIndex::in_memory();
        drop(index.claim(&fp(1)).await);
        assert!(index.is_empty());
        assert!(index.claim(&fp(1)).await.should_download(false));
    }

    #[tokio::test]
    async fn test_claims_on_one_fingerprint_serialize() {
        let index = Arc::new(DuplicateIndex::in_memory());
        let first = index.claim(&fp(7)).await;

        let contender = {
            let index = index.clone();
            tokio::spawn(async move { index.claim(&fp(7)).await.should_download(false) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        index.record(first, entry("seven.pdf"));
        assert!(!contender.await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("index.json");

        let index = DuplicateIndex::open(&path).await.unwrap();
        assert!(index.is_empty());
        for n in 0..3 {
            let claim = index.claim(&fp(n)).await;
            index.record(claim, entry(&format!("{}.pdf", n)));
        }
        index.persist().await.unwrap();

        let reloaded = DuplicateIndex::open(&path).await.unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(&fp(2)).unwrap().local_path, PathBuf::from("2.pdf"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = DuplicateIndex::open(&path).await.unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }
}
