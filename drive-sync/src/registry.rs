//! Registry of live and recently finished sync jobs
//!
//! Each job has exactly one writer, the [`JobHandle`] owned by its worker.
//! Readers get cloned snapshots and never wait on a worker for longer than a
//! single counter update.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::job::{JobId, JobStatus, SyncJob};

/// How long jobs are kept around
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Time a terminal job stays readable for a final poll
    pub grace_period: Duration,
    /// Absolute ceiling for a job to reach a terminal status
    pub job_timeout: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(600),
            job_timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug)]
struct JobSlot {
    job: RwLock<SyncJob>,
    cancel: CancellationToken,
    started: Instant,
    finished: Mutex<Option<Instant>>,
}

impl JobSlot {
    fn snapshot(&self) -> SyncJob {
        self.job.read().clone()
    }

    fn apply<F: FnOnce(&mut SyncJob)>(&self, f: F) -> bool {
        let mut job = self.job.write();
        if job.status.is_terminal() {
            return false;
        }
        f(&mut job);
        job.updated_at = chrono::Utc::now();
        true
    }

    fn change_status<F: FnOnce(&mut SyncJob) -> Result<()>>(&self, f: F) -> Result<()> {
        let mut job = self.job.write();
        f(&mut job)?;
        if job.status.is_terminal() {
            *self.finished.lock() = Some(Instant::now());
        }
        Ok(())
    }
}

/// Write access to one job, held by the worker that owns it
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    slot: Arc<JobSlot>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.slot.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.cancel.is_cancelled()
    }

    /// Mutate the job unless it already reached a terminal status, which
    /// freezes its counters. Returns whether the update was applied.
    pub fn update<F: FnOnce(&mut SyncJob)>(&self, f: F) -> bool {
        self.slot.apply(f)
    }

    pub fn transition(&self, next: JobStatus) -> Result<()> {
        self.slot.change_status(|job| job.transition(next))
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        self.slot.change_status(|job| job.fail(message))
    }

    pub fn snapshot(&self) -> SyncJob {
        self.slot.snapshot()
    }
}

/// Outcome of one [`JobRegistry::sweep`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal jobs removed after their grace period
    pub evicted: Vec<JobId>,
    /// Jobs that overran the time ceiling, failed and removed
    pub reclaimed: Vec<JobId>,
}

/// Shared job table
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    retention: RetentionPolicy,
}

impl JobRegistry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Register a job in `Analyzing` and hand back its only writer
    pub fn create(&self, root_folder_id: &str, max_depth: usize, force_redownload: bool) -> JobHandle {
        let id = JobId::new();
        let slot = Arc::new(JobSlot {
            job: RwLock::new(SyncJob::new(id, root_folder_id, max_depth, force_redownload)),
            cancel: CancellationToken::new(),
            started: Instant::now(),
            finished: Mutex::new(None),
        });

        self.jobs.write().insert(id, slot.clone());
        debug!(job_id = %id, "Registered sync job");
        JobHandle { id, slot }
    }

    fn slot(&self, id: &JobId) -> Result<Arc<JobSlot>> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::JobNotFound(id.to_string()))
    }

    /// Consistent copy of a job's current state
    pub fn snapshot(&self, id: &JobId) -> Result<SyncJob> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Request cooperative cancellation. Terminal jobs are left as they are.
    ///
    /// The status check and the request happen under the job lock, so a job
    /// finishing concurrently never ends up flagged.
    pub fn cancel(&self, id: &JobId) -> Result<JobStatus> {
        let slot = self.slot(id)?;
        let mut job = slot.job.write();
        if !job.status.is_terminal() {
            job.cancel_requested = true;
            slot.cancel.cancel();
            info!(job_id = %id, status = %job.status, "Cancellation requested");
        }
        Ok(job.status)
    }

    /// Fail a job from outside its worker, e.g. after the worker died
    pub fn force_fail(&self, id: &JobId, message: &str) -> Result<()> {
        let slot = self.slot(id)?;
        slot.cancel.cancel();
        slot.change_status(|job| job.fail(message))
    }

    pub fn list(&self) -> Vec<SyncJob> {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().values().cloned().collect();
        let mut jobs: Vec<SyncJob> = slots.iter().map(|slot| slot.snapshot()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Jobs that have not reached a terminal status
    pub fn active_count(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|slot| !slot.job.read().status.is_terminal())
            .count()
    }

    /// Count of jobs per status, for metrics
    pub fn status_counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for slot in self.jobs.read().values() {
            *counts.entry(slot.job.read().status).or_insert(0) += 1;
        }
        counts
    }

    /// Evict terminal jobs past their grace period and reclaim jobs stuck
    /// past the time ceiling.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        {
            let jobs = self.jobs.read();
            for (id, slot) in jobs.iter() {
                let status = slot.job.read().status;
                if status.is_terminal() {
                    let finished = *slot.finished.lock();
                    let expired = finished
                        .map(|at| now.saturating_duration_since(at) >= self.retention.grace_period)
                        .unwrap_or(false);
                    if expired {
                        report.evicted.push(*id);
                    }
                } else if now.saturating_duration_since(slot.started) >= self.retention.job_timeout {
                    report.reclaimed.push(*id);
                }
            }
        }

        for id in &report.reclaimed {
            warn!(job_id = %id, "Job exceeded time ceiling, reclaiming");
            if let Err(e) = self.force_fail(id, "timeout") {
                debug!(job_id = %id, error = %e, "Job finished while being reclaimed");
            }
        }

        if !report.evicted.is_empty() || !report.reclaimed.is_empty() {
            let mut jobs = self.jobs.write();
            for id in report.evicted.iter().chain(report.reclaimed.iter()) {
                jobs.remove(id);
            }
            debug!(
                evicted = report.evicted.len(),
                reclaimed = report.reclaimed.len(),
                "Swept job registry"
            );
        }

        report
    }
}
