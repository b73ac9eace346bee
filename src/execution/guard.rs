//! At-most-one-outstanding-job guard
//!
//! The guard reads the source, asks the status tracker about its current job
//! and only submits when that job is finished, unknown or stale. The new job
//! reference is written back with a compare-and-swap against the job that was
//! observed, so two processes racing on the same source cannot both record a
//! submission. Within one process submissions for a source are additionally
//! serialized by a per-source lock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::JobStatusTracker;
use crate::backends::{JobBackend, JobRequest, SourceStore};
use crate::config::SchedulerConfig;
use crate::errors::{AppError, AppResult, BackendError};
use crate::models::{JobHandle, JobStatus, RefreshMethod, Source, SourceId};
use crate::utils::time::elapsed_between;

/// Why a submission was refused. Expected during normal operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardRejected {
    #[error("source {source_id} already has job {job} outstanding (running for {running_for:?})")]
    JobOutstanding {
        source_id: SourceId,
        job: JobHandle,
        running_for: Duration,
    },

    #[error("job reference of source {source_id} changed during submission")]
    ConcurrentSubmission { source_id: SourceId },
}

/// Outcome of `ExecutionGuard::try_submit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Submitted(JobHandle),
    Rejected(GuardRejected),
}

impl Submission {
    pub fn job(&self) -> Option<&JobHandle> {
        match self {
            Submission::Submitted(job) => Some(job),
            Submission::Rejected(_) => None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Submission::Submitted(_))
    }
}

pub struct ExecutionGuard {
    store: Arc<dyn SourceStore>,
    backend: Arc<dyn JobBackend>,
    tracker: JobStatusTracker,
    call_timeout: Duration,
    locks: Mutex<HashMap<SourceId, Arc<Mutex<()>>>>,
}

impl ExecutionGuard {
    pub fn new(
        store: Arc<dyn SourceStore>,
        backend: Arc<dyn JobBackend>,
        config: &SchedulerConfig,
    ) -> Self {
        let tracker = JobStatusTracker::new(
            backend.clone(),
            config.job_call_timeout,
            config.max_job_runtime,
        );
        Self {
            store,
            backend,
            tracker,
            call_timeout: config.job_call_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &JobStatusTracker {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn SourceStore> {
        &self.store
    }

    /// Normalized status of the source's most recent job
    pub async fn status(&self, source: &Source) -> JobStatus {
        self.tracker.status(source).await
    }

    async fn source_lock(&self, id: &SourceId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-source lock once no other submission holds or awaits it
    async fn release_lock(&self, id: &SourceId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one in `lock`
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }

    /// Submit a job for the source unless one is still outstanding.
    ///
    /// `force` submits regardless of the current job. Store and backend
    /// failures are returned as errors; a refusal is a `Submission::Rejected`.
    pub async fn try_submit(
        &self,
        id: &SourceId,
        method: RefreshMethod,
        force: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Submission> {
        let lock = self.source_lock(id).await;
        let outcome = {
            let _held = lock.lock().await;
            self.submit_locked(id, method, force, now).await
        };
        self.release_lock(id, lock).await;
        outcome
    }

    async fn submit_locked(
        &self,
        id: &SourceId,
        method: RefreshMethod,
        force: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Submission> {
        let source = self
            .store
            .get_source(id)
            .await?
            .ok_or_else(|| AppError::not_found("source", id.as_str()))?;

        let status = self.tracker.status(&source).await;
        let stale = self.tracker.is_stale(&source, status, now);

        if !status.allows_submission() && !stale && !force {
            if let Some(job) = source.current_job.clone() {
                let running_for = source
                    .job_submitted_at
                    .map(|at| elapsed_between(at, now))
                    .unwrap_or_default();
                debug!(
                    "Not submitting {} for source {}: job {} still running",
                    method, id, job
                );
                return Ok(Submission::Rejected(GuardRejected::JobOutstanding {
                    source_id: id.clone(),
                    job,
                    running_for,
                }));
            }
        }

        if stale {
            info!(
                "Job {:?} for source {} exceeded {:?}, submitting a replacement",
                source.current_job,
                id,
                self.tracker.max_job_runtime()
            );
        } else if force && !status.allows_submission() {
            info!(
                "Forcing {} for source {} over running job {:?}",
                method, id, source.current_job
            );
        }

        let request = JobRequest::for_source(&source, method);
        let job = timeout(self.call_timeout, self.backend.submit_job(&request))
            .await
            .map_err(|_| BackendError::timeout("submit_job", self.call_timeout))??;

        let persisted = self
            .store
            .persist_job_reference(id, source.current_job.as_ref(), &job, now)
            .await?;

        if !persisted {
            warn!(
                "Job {} for source {} was submitted but another submission won the job reference",
                job, id
            );
            return Ok(Submission::Rejected(GuardRejected::ConcurrentSubmission {
                source_id: id.clone(),
            }));
        }

        info!("Submitted {} for source {} as job {}", method, id, job);
        Ok(Submission::Submitted(job))
    }
}
