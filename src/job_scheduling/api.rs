//! Outward API for manual triggers and status reporting
//!
//! Everything here goes through the same `ExecutionGuard` as the scheduler,
//! so a manual trigger racing a scheduled dispatch still yields at most one
//! outstanding job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::execution::{ExecutionGuard, Submission};
use crate::models::{JobHandle, JobReport, JobStatus, RefreshMethod, SourceId};

/// Result of `RefreshApi::refresh_all`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub submitted: Vec<SourceId>,
    pub rejected: Vec<SourceId>,
    pub failed: Vec<SourceId>,
}

impl RefreshSummary {
    pub fn total(&self) -> usize {
        self.submitted.len() + self.rejected.len() + self.failed.len()
    }
}

/// Job status of one source, mirroring the worker's status report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatusReport {
    pub source_id: SourceId,
    pub status: JobStatus,
    pub stale: bool,
    pub job: Option<JobHandle>,
    pub job_submitted_at: Option<DateTime<Utc>>,
    pub report: Option<JobReport>,
}

#[derive(Clone)]
pub struct RefreshApi {
    guard: Arc<ExecutionGuard>,
}

impl RefreshApi {
    pub fn new(guard: Arc<ExecutionGuard>) -> Self {
        Self { guard }
    }

    /// Refresh a source now, outside its schedule. Still refused while a
    /// non-stale job is outstanding.
    pub async fn force_refresh(&self, id: &SourceId, now: DateTime<Utc>) -> AppResult<Submission> {
        info!("API: Triggering immediate refresh for source {}", id);
        self.trigger(id, RefreshMethod::RefreshData, now).await
    }

    /// Re-run field inference for a source
    pub async fn update_fields(&self, id: &SourceId, now: DateTime<Utc>) -> AppResult<Submission> {
        info!("API: Triggering field update for source {}", id);
        self.trigger(id, RefreshMethod::UpdateFields, now).await
    }

    async fn trigger(
        &self,
        id: &SourceId,
        method: RefreshMethod,
        now: DateTime<Utc>,
    ) -> AppResult<Submission> {
        self.guard.try_submit(id, method, false, now).await
    }

    /// Submit a data refresh for every source in the store, disabled ones included.
    ///
    /// With `force` outstanding jobs are ignored. Per-source failures are
    /// collected in the summary; only a failure to list sources is an error.
    pub async fn refresh_all(&self, force: bool, now: DateTime<Utc>) -> AppResult<RefreshSummary> {
        let sources = self.guard.store().list_active_sources().await?;
        info!(
            "API: Refreshing all {} sources (force: {})",
            sources.len(),
            force
        );

        let mut summary = RefreshSummary::default();
        for source in sources {
            match self
                .guard
                .try_submit(&source.id, RefreshMethod::RefreshData, force, now)
                .await
            {
                Ok(Submission::Submitted(_)) => summary.submitted.push(source.id),
                Ok(Submission::Rejected(reason)) => {
                    info!("Skipping source {}: {}", source.id, reason);
                    summary.rejected.push(source.id);
                }
                Err(e) => {
                    warn!("Failed to refresh source {}: {}", source.id, e);
                    summary.failed.push(source.id);
                }
            }
        }

        Ok(summary)
    }

    pub async fn source_status(
        &self,
        id: &SourceId,
        now: DateTime<Utc>,
    ) -> AppResult<SourceStatusReport> {
        let source = self
            .guard
            .store()
            .get_source(id)
            .await?
            .ok_or_else(|| AppError::not_found("source", id.as_str()))?;

        let tracker = self.guard.tracker();
        let (status, report) = match source.current_job.as_ref() {
            None => (JobStatus::Unknown, None),
            Some(job) => match tracker.report(job).await {
                Ok(report) => (JobStatus::from_remote(&report.state), Some(report)),
                Err(e) => {
                    warn!("Could not fetch report of job {} for source {}: {}", job, id, e);
                    (JobStatus::Unknown, None)
                }
            },
        };

        Ok(SourceStatusReport {
            stale: tracker.is_stale(&source, status, now),
            source_id: source.id,
            status,
            job: source.current_job,
            job_submitted_at: source.job_submitted_at,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryJobBackend, MemorySourceStore};
    use crate::config::SchedulerConfig;
    use crate::execution::GuardRejected;
    use crate::models::{RemoteJobState, Source, SourceKind};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap()
    }

    fn api(sources: impl IntoIterator<Item = Source>) -> (RefreshApi, Arc<MemoryJobBackend>) {
        let store = Arc::new(MemorySourceStore::with_sources(sources));
        let backend = Arc::new(MemoryJobBackend::new());
        let guard = ExecutionGuard::new(store, backend.clone(), &SchedulerConfig::default());
        (RefreshApi::new(Arc::new(guard)), backend)
    }

    fn source(id: &str, refresh_minutes: i64) -> Source {
        Source::new(id, id, SourceKind::Wmts, refresh_minutes, now())
    }

    #[tokio::test]
    async fn test_force_refresh_passes_the_guard() {
        let (api, backend) = api([source("a", -1)]);
        let id = SourceId::from("a");

        assert!(api.force_refresh(&id, now()).await.unwrap().is_submitted());
        assert!(matches!(
            api.force_refresh(&id, now()).await.unwrap(),
            Submission::Rejected(GuardRejected::JobOutstanding { .. })
        ));
        assert_eq!(backend.submission_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_fields_uses_its_method() {
        let (api, backend) = api([source("a", 60)]);
        api.update_fields(&SourceId::from("a"), now()).await.unwrap();

        let submissions = backend.submissions().await;
        assert_eq!(submissions[0].1.method, RefreshMethod::UpdateFields);
        assert_eq!(submissions[0].1.kind, SourceKind::Wmts);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_source() {
        let (api, backend) = api([source("a", 60), source("b", 0), source("c", -1)]);
        api.force_refresh(&SourceId::from("a"), now()).await.unwrap();

        let summary = api.refresh_all(false, now()).await.unwrap();
        assert_eq!(summary.submitted, vec![SourceId::from("b"), SourceId::from("c")]);
        assert_eq!(summary.rejected, vec![SourceId::from("a")]);
        assert!(summary.failed.is_empty());

        let forced = api.refresh_all(true, now()).await.unwrap();
        assert_eq!(forced.submitted.len(), 3);
        assert_eq!(backend.submission_count().await, 6);
    }

    #[tokio::test]
    async fn test_refresh_all_collects_failures() {
        let (api, backend) = api([source("a", 60), source("b", 60)]);
        backend.set_fail_submissions(true);

        let summary = api.refresh_all(false, now()).await.unwrap();
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.total(), 2);
    }

    #[tokio::test]
    async fn test_source_status_reports_job() {
        let (api, backend) = api([source("a", 60)]);
        let id = SourceId::from("a");

        let idle = api.source_status(&id, now()).await.unwrap();
        assert_eq!(idle.status, JobStatus::Unknown);
        assert!(idle.report.is_none());

        let submission = api.force_refresh(&id, now()).await.unwrap();
        let job = submission.job().unwrap();
        backend.set_state(job, RemoteJobState::Success).await;
        backend
            .set_result(job, serde_json::json!({"records": 42}))
            .await;

        let done = api.source_status(&id, now()).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(!done.stale);
        assert_eq!(
            done.report.and_then(|report| report.result),
            Some(serde_json::json!({"records": 42}))
        );
    }

    #[tokio::test]
    async fn test_source_status_flags_stale_jobs() {
        let (api, _backend) = api([source("a", 60)]);
        let id = SourceId::from("a");
        api.force_refresh(&id, now()).await.unwrap();

        let later = api
            .source_status(&id, now() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(later.status, JobStatus::Running);
        assert!(later.stale);
    }

    #[tokio::test]
    async fn test_unknown_source_status_is_not_found() {
        let (api, _backend) = api([]);
        assert!(matches!(
            api.source_status(&SourceId::from("nope"), now()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
