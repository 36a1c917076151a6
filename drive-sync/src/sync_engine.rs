//! Sync engine that runs analysis and download jobs in the background

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use drive_core::{parse_folder_id, ApiKey, FolderProvider, ProviderError};

use crate::analyzer::{AccessReport, AnalysisResult, FolderAnalyzer};
use crate::dedup::{DuplicateIndex, IndexEntry};
use crate::error::{Result, SyncError};
use crate::job::{JobId, JobStatus, SyncJob};
use crate::registry::{JobHandle, JobRegistry, RetentionPolicy};
use crate::retry::RetryPolicy;
use crate::store::LocalStore;
use crate::tree::{FileRef, FolderNode};

/// Engine-wide knobs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Depth used when a request names none
    pub default_max_depth: usize,
    /// Largest depth a request may ask for
    pub max_depth_limit: usize,
    /// Folders listed concurrently per depth level
    pub listing_concurrency: usize,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
    /// Number of file names returned by an access probe
    pub access_sample_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_max_depth: 10,
            max_depth_limit: 50,
            listing_concurrency: 4,
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            access_sample_size: 5,
        }
    }
}

/// Parameters of one sync run
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Folder id or any Drive folder URL
    pub root: String,
    pub credential: Option<ApiKey>,
    pub max_depth: Option<usize>,
    pub force_redownload: bool,
}

enum FileOutcome {
    Downloaded,
    Skipped,
}

struct EngineInner {
    provider: Arc<dyn FolderProvider>,
    analyzer: FolderAnalyzer,
    index: Arc<DuplicateIndex>,
    registry: Arc<JobRegistry>,
    store: LocalStore,
    options: EngineOptions,
    force_next: AtomicBool,
}

/// Entry point for every sync operation. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn FolderProvider>,
        index: Arc<DuplicateIndex>,
        store: LocalStore,
        options: EngineOptions,
    ) -> Self {
        let analyzer = FolderAnalyzer::new(provider.clone(), options.listing_concurrency);
        let registry = Arc::new(JobRegistry::new(options.retention));
        Self {
            inner: Arc::new(EngineInner {
                provider,
                analyzer,
                index,
                registry,
                store,
                options,
                force_next: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn index(&self) -> &Arc<DuplicateIndex> {
        &self.inner.index
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Validate the request, register a job and run it in the background.
    ///
    /// Returns as soon as the job exists. Invalid identifiers and depths are
    /// rejected here and never create a job.
    pub fn start(&self, request: SyncRequest) -> Result<JobId> {
        let root_id = folder_id(&request.root)?;
        let max_depth = self.resolve_depth(request.max_depth)?;
        let force = self.inner.force_next.swap(false, Ordering::SeqCst) | request.force_redownload;

        let handle = self.inner.registry.create(&root_id, max_depth, force);
        let id = handle.id();
        info!(job_id = %id, root_id = %root_id, max_depth, force, "Starting sync job");

        let inner = self.inner.clone();
        let credential = request.credential;
        let worker = tokio::spawn(async move {
            inner
                .run_job(handle, root_id, credential, max_depth, force)
                .await;
        });

        let registry = self.inner.registry.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(job_id = %id, error = %e, "Sync worker crashed");
                let crash = SyncError::WorkerCrashed(e.to_string());
                if let Err(e) = registry.force_fail(&id, &crash.to_string()) {
                    debug!(job_id = %id, error = %e, "Could not mark crashed job");
                }
            }
        });

        Ok(id)
    }

    /// Snapshot of a job's state
    pub fn progress(&self, id: &JobId) -> Result<SyncJob> {
        self.inner.registry.snapshot(id)
    }

    /// Ask a job to stop at its next checkpoint
    pub fn cancel(&self, id: &JobId) -> Result<JobStatus> {
        self.inner.registry.cancel(id)
    }

    /// Request cancellation of every unfinished job
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for job in self.inner.registry.list() {
            if !job.status.is_terminal() && self.inner.registry.cancel(&job.id).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn jobs(&self) -> Vec<SyncJob> {
        self.inner.registry.list()
    }

    /// Make the next started job bypass the duplicate index. Running jobs are
    /// unaffected. Returns the number of files currently indexed.
    pub fn arm_force_redownload(&self) -> usize {
        self.inner.force_next.store(true, Ordering::SeqCst);
        let existing = self.inner.index.len();
        info!(existing_files = existing, "Force re-download armed for next sync");
        existing
    }

    pub fn force_redownload_armed(&self) -> bool {
        self.inner.force_next.load(Ordering::SeqCst)
    }

    /// Analyze a folder tree without creating a job
    pub async fn analyze(
        &self,
        root: &str,
        credential: Option<&ApiKey>,
        max_depth: Option<usize>,
    ) -> Result<AnalysisResult> {
        let root_id = folder_id(root)?;
        let max_depth = self.resolve_depth(max_depth)?;
        self.inner
            .analyzer
            .analyze(&root_id, credential, max_depth, &CancellationToken::new())
            .await
    }

    /// Non-recursive access probe
    pub async fn test_access(&self, folder: &str, credential: Option<&ApiKey>) -> Result<AccessReport> {
        let folder_id = folder_id(folder)?;
        Ok(self
            .inner
            .analyzer
            .test_access(&folder_id, credential, self.inner.options.access_sample_size)
            .await)
    }

    /// Periodically evict finished jobs and reclaim stuck ones until
    /// `shutdown` fires
    pub fn spawn_reaper(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.inner.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Job reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = registry.sweep(Instant::now());
                        if !report.reclaimed.is_empty() {
                            warn!(reclaimed = report.reclaimed.len(), "Reclaimed stuck jobs");
                        }
                    }
                }
            }
        })
    }

    fn resolve_depth(&self, requested: Option<usize>) -> Result<usize> {
        let limit = self.inner.options.max_depth_limit;
        let depth = requested.unwrap_or(self.inner.options.default_max_depth);
        if depth == 0 || depth > limit {
            return Err(SyncError::InvalidArgument(format!(
                "max_depth must be between 1 and {}, got {}",
                limit, depth
            )));
        }
        Ok(depth)
    }
}

fn folder_id(input: &str) -> Result<String> {
    parse_folder_id(input).map_err(|e| match e {
        ProviderError::InvalidIdentifier(message) => SyncError::InvalidIdentifier(message),
        other => SyncError::InvalidIdentifier(other.to_string()),
    })
}

impl EngineInner {
    #[instrument(skip(self, handle, credential), fields(job_id = %handle.id()))]
    async fn run_job(
        &self,
        handle: JobHandle,
        root_id: String,
        credential: Option<ApiKey>,
        max_depth: usize,
        force: bool,
    ) {
        let started = Instant::now();
        let ceiling = self.options.retention.job_timeout;

        let outcome = tokio::time::timeout(
            ceiling,
            self.execute(&handle, &root_id, credential.as_ref(), max_depth, force, started),
        )
        .await
        .unwrap_or(Err(SyncError::Timeout(ceiling)));

        handle.update(|job| job.timing.total_time = Some(started.elapsed().as_secs_f64()));
        let finished = match outcome {
            Ok(()) => Ok(()),
            Err(SyncError::Cancelled) => {
                info!("Sync job cancelled");
                handle.transition(JobStatus::Cancelled)
            }
            Err(SyncError::Timeout(limit)) => {
                warn!(limit_secs = limit.as_secs(), "Sync job timed out");
                handle.cancel_token().cancel();
                handle.fail("timeout")
            }
            Err(e) => {
                error!(error = %e, "Sync job failed");
                handle.fail(e.to_string())
            }
        };
        if let Err(e) = finished {
            debug!(error = %e, "Job was already finished elsewhere");
        }

        if let Err(e) = self.index.persist().await {
            error!(error = %e, "Failed to persist duplicate index");
        }
    }

    async fn execute(
        &self,
        handle: &JobHandle,
        root_id: &str,
        credential: Option<&ApiKey>,
        max_depth: usize,
        force: bool,
        started: Instant,
    ) -> Result<()> {
        let cancel = handle.cancel_token().clone();

        let analysis = self.analyzer.analyze(root_id, credential, max_depth, &cancel).await?;
        handle.update(|job| {
            job.root_folder_name = Some(analysis.root_folder_name.clone());
            job.statistics.total_folders = analysis.statistics.total_folders;
            job.statistics.total_files = analysis.statistics.total_files;
            job.timing.analysis_time = Some(analysis.elapsed.as_secs_f64());
        });
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        handle.transition(JobStatus::Processing)?;

        let downloads_started = Instant::now();
        let files = analysis.folder_structure.files();
        info!(files = files.len(), "Processing files");

        for (folder, file) in files {
            if cancel.is_cancelled() {
                handle.update(|job| {
                    job.timing.download_time = Some(downloads_started.elapsed().as_secs_f64())
                });
                return Err(SyncError::Cancelled);
            }
            handle.update(|job| job.current_file = Some(file.name.clone()));

            match self.process_file(folder, file, credential, force, &cancel).await {
                Ok(FileOutcome::Downloaded) => {
                    handle.update(|job| job.statistics.downloaded_files += 1);
                }
                Ok(FileOutcome::Skipped) => {
                    handle.update(|job| job.statistics.skipped_duplicates += 1);
                }
                Err(SyncError::Cancelled) => {
                    handle.update(|job| {
                        job.timing.download_time = Some(downloads_started.elapsed().as_secs_f64())
                    });
                    return Err(SyncError::Cancelled);
                }
                Err(e) => {
                    warn!(file_id = %file.id, name = %file.name, error = %e, "File failed");
                    handle.update(|job| job.statistics.errors += 1);
                }
            }
        }

        handle.update(|job| {
            job.current_file = None;
            job.timing.download_time = Some(downloads_started.elapsed().as_secs_f64());
            job.timing.total_time = Some(started.elapsed().as_secs_f64());
        });
        handle.transition(JobStatus::Completed)?;

        let stats = handle.snapshot().statistics;
        info!(
            downloaded = stats.downloaded_files,
            skipped = stats.skipped_duplicates,
            errors = stats.errors,
            "Sync job completed"
        );
        Ok(())
    }

    async fn process_file(
        &self,
        folder: &FolderNode,
        file: &FileRef,
        credential: Option<&ApiKey>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        // A claim can wait on another job's download of the same shard
        let claim = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            claim = self.index.claim(&file.fingerprint) => claim,
        };
        if !claim.should_download(force) {
            debug!(file_id = %file.id, fingerprint = %claim.fingerprint(), "Duplicate, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let content = self
            .options
            .retry
            .run(cancel, || self.provider.download(&file.id, &file.mime_type, credential))
            .await?;

        let path = self.store.path_for(&folder.path, &file.local_name);
        self.store.write(&path, &content).await?;

        self.index.record(
            claim,
            IndexEntry {
                file_id: file.id.clone(),
                local_path: path,
                size: content.len() as u64,
                synced_at: Utc::now(),
            },
        );
        Ok(FileOutcome::Downloaded)
    }
}
