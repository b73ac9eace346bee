//! Normalized view of a source's most recently submitted job

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::backends::JobBackend;
use crate::errors::{BackendError, BackendResult};
use crate::models::{JobHandle, JobReport, JobStatus, Source};
use crate::utils::time::elapsed_between;

/// Turns job handles into `JobStatus` verdicts
///
/// Every query is bounded by `call_timeout`. Any failure to learn the state
/// of a job yields `JobStatus::Unknown`, which the guard treats as eligible,
/// so an unreachable backend never wedges a source.
#[derive(Clone)]
pub struct JobStatusTracker {
    backend: Arc<dyn JobBackend>,
    call_timeout: Duration,
    max_job_runtime: Duration,
}

impl JobStatusTracker {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        call_timeout: Duration,
        max_job_runtime: Duration,
    ) -> Self {
        Self {
            backend,
            call_timeout,
            max_job_runtime,
        }
    }

    pub fn max_job_runtime(&self) -> Duration {
        self.max_job_runtime
    }

    /// Raw report for one job, bounded by the call timeout
    pub async fn report(&self, job: &JobHandle) -> BackendResult<JobReport> {
        timeout(self.call_timeout, self.backend.query_job(job))
            .await
            .map_err(|_| BackendError::timeout("query_job", self.call_timeout))?
    }

    pub async fn status(&self, source: &Source) -> JobStatus {
        let Some(job) = source.current_job.as_ref() else {
            return JobStatus::Unknown;
        };

        match self.report(job).await {
            Ok(report) => {
                let status = JobStatus::from_remote(&report.state);
                trace!(
                    "Job {} for source {} is {:?} ({:?})",
                    job, source.id, status, report.state
                );
                status
            }
            Err(e) => {
                warn!(
                    "Could not determine status of job {} for source {}: {}",
                    job, source.id, e
                );
                JobStatus::Unknown
            }
        }
    }

    /// A running job is stale once it has been outstanding longer than the
    /// maximum runtime. A running job with no submission time is stale too.
    pub fn is_stale(&self, source: &Source, status: JobStatus, now: DateTime<Utc>) -> bool {
        if status != JobStatus::Running {
            return false;
        }

        match source.job_submitted_at {
            Some(submitted_at) => elapsed_between(submitted_at, now) > self.max_job_runtime,
            None => true,
        }
    }
}
