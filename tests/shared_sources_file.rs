//! Two scheduler processes sharing one sources file and one job backend

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

use geosource_scheduler::backends::{FileSourceStore, MemoryJobBackend};
use geosource_scheduler::config::SchedulerConfig;
use geosource_scheduler::execution::{ExecutionGuard, GuardRejected, Submission};
use geosource_scheduler::job_scheduling::{HeapScheduler, RefreshApi};
use geosource_scheduler::models::{JobStatus, RemoteJobState, SourceId};

const SOURCES: &str = r#"
[[sources]]
id = "roads"
name = "Road network"
kind = "postgis"
refresh = 30
last_run_at = "2020-01-01T00:00:00Z"
"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap()
}

/// One process: its own store handle and guard, the backend is shared
fn process(path: &Path, backend: &Arc<MemoryJobBackend>) -> Arc<ExecutionGuard> {
    let store = Arc::new(FileSourceStore::new(path));
    Arc::new(ExecutionGuard::new(
        store,
        backend.clone(),
        &SchedulerConfig::default(),
    ))
}

fn sources_file() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.toml");
    std::fs::write(&path, SOURCES).unwrap();
    (dir, path)
}

#[tokio::test]
async fn job_submitted_by_one_process_blocks_the_other() {
    let (_dir, path) = sources_file();
    let backend = Arc::new(MemoryJobBackend::new());
    let first = RefreshApi::new(process(&path, &backend));
    let second = RefreshApi::new(process(&path, &backend));
    let roads = SourceId::from("roads");

    let submitted = first.force_refresh(&roads, now()).await.unwrap();
    let job = submitted.job().cloned().unwrap();

    let status = second.source_status(&roads, now()).await.unwrap();
    assert_eq!(status.status, JobStatus::Running);
    assert_eq!(status.job, Some(job));

    let refused = second.force_refresh(&roads, now()).await.unwrap();
    assert!(matches!(
        refused,
        Submission::Rejected(GuardRejected::JobOutstanding { .. })
    ));
    assert_eq!(backend.submission_count().await, 1);
}

#[tokio::test]
async fn scheduler_respects_a_job_recorded_by_another_process() {
    let (_dir, path) = sources_file();
    let backend = Arc::new(MemoryJobBackend::new());
    let manual = RefreshApi::new(process(&path, &backend));

    let job = manual
        .force_refresh(&SourceId::from("roads"), now())
        .await
        .unwrap()
        .job()
        .cloned()
        .unwrap();

    let store = Arc::new(FileSourceStore::new(&path));
    let guard = process(&path, &backend);
    let mut scheduler = HeapScheduler::new(store, guard, SchedulerConfig::default());

    // The recorded submission counts as the last run
    scheduler.tick(now()).await;
    assert_eq!(backend.submission_count().await, 1);

    // Interval elapsed while the job still runs
    scheduler.tick(now() + chrono::Duration::minutes(31)).await;
    assert_eq!(backend.submission_count().await, 1);

    backend.set_state(&job, RemoteJobState::Success).await;
    scheduler.tick(now() + chrono::Duration::minutes(61)).await;
    assert_eq!(backend.submission_count().await, 2);
}
