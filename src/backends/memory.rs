//! In-process collaborators
//!
//! `MemorySourceStore` and `MemoryJobBackend` back the binary's dry-run mode
//! and the test suites. Both can be told to fail so the degraded paths of the
//! scheduler can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{JobBackend, JobRequest, SourceStore};
use crate::errors::{BackendError, BackendResult, StoreError, StoreResult};
use crate::models::{JobHandle, JobReport, RemoteJobState, Source, SourceId};

/// Source store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    sources: RwLock<BTreeMap<SourceId, Source>>,
    last_deletion: RwLock<Option<DateTime<Utc>>>,
    unavailable: AtomicBool,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.id.clone(), source))
            .collect();
        Self {
            sources: RwLock::new(sources),
            ..Self::default()
        }
    }

    /// Insert or replace a source; its `updated_at` is the new watermark
    pub async fn upsert(&self, source: Source) {
        self.sources.write().await.insert(source.id.clone(), source);
    }

    /// Delete a source, recording `deleted_at` as a mutation
    pub async fn remove(&self, id: &SourceId, deleted_at: DateTime<Utc>) -> Option<Source> {
        let removed = self.sources.write().await.remove(id);
        if removed.is_some() {
            let mut last = self.last_deletion.write().await;
            *last = Some(last.map_or(deleted_at, |previous| previous.max(deleted_at)));
        }
        removed
    }

    /// Simulate an unreachable store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn list_active_sources(&self) -> StoreResult<Vec<Source>> {
        self.check_available()?;
        Ok(self.sources.read().await.values().cloned().collect())
    }

    async fn latest_mutation_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        let latest_update = self
            .sources
            .read()
            .await
            .values()
            .map(|source| source.updated_at)
            .max();
        let last_deletion = *self.last_deletion.read().await;
        Ok(latest_update.max(last_deletion))
    }

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        self.check_available()?;
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn persist_job_reference(
        &self,
        id: &SourceId,
        expected: Option<&JobHandle>,
        job: &JobHandle,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_available()?;
        let mut sources = self.sources.write().await;
        let Some(source) = sources.get_mut(id) else {
            return Ok(false);
        };

        if source.current_job.as_ref() != expected {
            debug!(
                "Job reference for source {} changed underneath us ({:?} != {:?})",
                id, source.current_job, expected
            );
            return Ok(false);
        }

        source.current_job = Some(job.clone());
        source.job_submitted_at = Some(submitted_at);
        source.last_run_at = Some(submitted_at);
        Ok(true)
    }
}

/// Job backend that records submissions and reports configurable states
#[derive(Debug, Default)]
pub struct MemoryJobBackend {
    submitted: RwLock<Vec<(JobHandle, JobRequest)>>,
    reports: RwLock<HashMap<JobHandle, JobReport>>,
    submit_delay: RwLock<Option<Duration>>,
    query_delay: RwLock<Option<Duration>>,
    fail_submissions: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted submission, oldest first
    pub async fn submissions(&self) -> Vec<(JobHandle, JobRequest)> {
        self.submitted.read().await.clone()
    }

    pub async fn submission_count(&self) -> usize {
        self.submitted.read().await.len()
    }

    pub async fn set_state(&self, job: &JobHandle, state: RemoteJobState) {
        let mut reports = self.reports.write().await;
        let report = reports
            .entry(job.clone())
            .or_insert_with(|| JobReport::new(RemoteJobState::Pending));
        if matches!(state, RemoteJobState::Success | RemoteJobState::Failure) {
            report.finished_at = Some(Utc::now());
        }
        report.state = state;
    }

    pub async fn set_result(&self, job: &JobHandle, result: serde_json::Value) {
        if let Some(report) = self.reports.write().await.get_mut(job) {
            report.result = Some(result);
        }
    }

    /// Delay every submission; a submission cut short records nothing
    pub async fn set_submit_delay(&self, delay: Option<Duration>) {
        *self.submit_delay.write().await = delay;
    }

    /// Delay every status query, to exercise call timeouts
    pub async fn set_query_delay(&self, delay: Option<Duration>) {
        *self.query_delay.write().await = delay;
    }

    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobBackend for MemoryJobBackend {
    async fn submit_job(&self, request: &JobRequest) -> BackendResult<JobHandle> {
        let delay = *self.submit_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("memory backend refuses submissions"));
        }

        let job = JobHandle::new(Uuid::new_v4().to_string());
        self.reports
            .write()
            .await
            .insert(job.clone(), JobReport::new(RemoteJobState::Pending));
        self.submitted
            .write()
            .await
            .push((job.clone(), request.clone()));

        debug!(
            "Memory backend accepted {} for source {} as job {}",
            request.method, request.source_id, job
        );
        Ok(job)
    }

    async fn query_job(&self, job: &JobHandle) -> BackendResult<JobReport> {
        let delay = *self.query_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("memory backend refuses queries"));
        }

        Ok(self
            .reports
            .read()
            .await
            .get(job)
            .cloned()
            .unwrap_or_else(|| JobReport::new(RemoteJobState::Pending)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RefreshMethod, SourceKind};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_deletion_advances_watermark() {
        let store = MemorySourceStore::with_sources([Source::new(
            "a",
            "A",
            SourceKind::Geojson,
            10,
            at(1),
        )]);
        assert_eq!(store.latest_mutation_time().await.unwrap(), Some(at(1)));

        store.remove(&SourceId::from("a"), at(5)).await;
        assert_eq!(store.latest_mutation_time().await.unwrap(), Some(at(5)));
        assert!(store.list_active_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_is_compare_and_swap() {
        let store = MemorySourceStore::with_sources([Source::new(
            "a",
            "A",
            SourceKind::Csv,
            10,
            at(1),
        )]);
        let id = SourceId::from("a");
        let first = JobHandle::new("job-1");
        let second = JobHandle::new("job-2");

        assert!(store.persist_job_reference(&id, None, &first, at(2)).await.unwrap());
        // Stale expectation loses
        assert!(!store.persist_job_reference(&id, None, &second, at(3)).await.unwrap());
        assert!(
            store
                .persist_job_reference(&id, Some(&first), &second, at(3))
                .await
                .unwrap()
        );

        let source = store.get_source(&id).await.unwrap().unwrap();
        assert_eq!(source.current_job, Some(second));
        assert_eq!(source.job_submitted_at, Some(at(3)));
        assert_eq!(source.last_run_at, Some(at(3)));
        // Bookkeeping does not count as a configuration change
        assert_eq!(store.latest_mutation_time().await.unwrap(), Some(at(1)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemorySourceStore::new();
        store.set_unavailable(true);
        assert!(store.list_active_sources().await.is_err());
        assert!(store.latest_mutation_time().await.is_err());
    }

    #[tokio::test]
    async fn test_backend_tracks_submissions_and_states() {
        let backend = MemoryJobBackend::new();
        let request = JobRequest {
            source_id: SourceId::from("a"),
            kind: SourceKind::Shapefile,
            method: RefreshMethod::RefreshData,
        };

        let job = backend.submit_job(&request).await.unwrap();
        assert_eq!(backend.submission_count().await, 1);
        assert_eq!(
            backend.query_job(&job).await.unwrap().state,
            RemoteJobState::Pending
        );

        backend.set_state(&job, RemoteJobState::Success).await;
        let report = backend.query_job(&job).await.unwrap();
        assert_eq!(report.state, RemoteJobState::Success);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_backend_can_refuse_submissions() {
        let backend = MemoryJobBackend::new();
        backend.set_fail_submissions(true);
        let request = JobRequest {
            source_id: SourceId::from("a"),
            kind: SourceKind::Wmts,
            method: RefreshMethod::UpdateFields,
        };
        assert!(backend.submit_job(&request).await.is_err());
        assert_eq!(backend.submission_count().await, 0);
    }
}
