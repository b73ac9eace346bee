//! TOML file backed source store
//!
//! The sources file is the authoritative list of sources and is re-read on
//! every call, so operators can edit it while the scheduler runs. Its
//! modification time is the mutation watermark.
//!
//! Job references are written to a sidecar state file next to it
//! (`sources.toml` keeps its jobs in `sources.jobs.toml`), so dispatches never
//! move the watermark. Every compare-and-swap runs under an exclusive advisory
//! lock on `sources.jobs.lock` and replaces the state file with an atomic
//! rename, which lets several scheduler processes share one sources file.
//!
//! ```toml
//! [[sources]]
//! id = "roads"
//! name = "Road network"
//! kind = "postgis"
//! refresh = 1440
//! last_run_at = "2020-01-01T00:00:00Z"
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::SourceStore;
use crate::errors::{StoreError, StoreResult};
use crate::models::{JobHandle, Source, SourceId, SourceKind};

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceRecord>,
}

#[derive(Debug, Deserialize)]
struct SourceRecord {
    id: SourceId,
    name: String,
    kind: SourceKind,
    /// Minutes between refreshes, zero or negative to disable
    #[serde(default)]
    refresh: i64,
    #[serde(default)]
    last_run_at: Option<DateTime<Utc>>,
}

/// Contents of the sidecar state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct JobState {
    #[serde(default)]
    jobs: BTreeMap<SourceId, JobRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job: JobHandle,
    submitted_at: DateTime<Utc>,
}

impl JobState {
    fn parse(path: &Path, contents: &str) -> StoreResult<Self> {
        toml::from_str(contents)
            .map_err(|e| StoreError::parse(path.display().to_string(), e.to_string()))
    }

    /// Blocking read; a missing file means no job was ever recorded
    fn read(path: &Path) -> StoreResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `path` by writing a temporary file in the same directory and
    /// renaming it over the old one
    fn write_atomically(&self, path: &Path) -> StoreResult<()> {
        let contents = toml::to_string(self)
            .map_err(|e| StoreError::encode(path.display().to_string(), e.to_string()))?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileSourceStore {
    path: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl FileSourceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            state_path: path.with_extension("jobs.toml"),
            lock_path: path.with_extension("jobs.lock"),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file holding the job references
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn modified_at(&self) -> StoreResult<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    /// Writers replace the state file by rename, so reading without the lock
    /// always sees a complete version
    async fn load_jobs(&self) -> StoreResult<JobState> {
        match tokio::fs::read_to_string(&self.state_path).await {
            Ok(contents) => JobState::parse(&self.state_path, &contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(JobState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self) -> StoreResult<Vec<Source>> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let file: SourcesFile = toml::from_str(&contents)
            .map_err(|e| StoreError::parse(self.path.display().to_string(), e.to_string()))?;
        let updated_at = self.modified_at().await?;
        let jobs = self.load_jobs().await?.jobs;

        trace!(
            "Loaded {} sources from {} ({} job references)",
            file.sources.len(),
            self.path.display(),
            jobs.len()
        );

        Ok(file
            .sources
            .into_iter()
            .map(|record| {
                let mut source =
                    Source::new(record.id, record.name, record.kind, record.refresh, updated_at);
                source.last_run_at = record.last_run_at;
                if let Some(job) = jobs.get(&source.id) {
                    source.current_job = Some(job.job.clone());
                    source.job_submitted_at = Some(job.submitted_at);
                    source.last_run_at = Some(
                        source
                            .last_run_at
                            .map_or(job.submitted_at, |at| at.max(job.submitted_at)),
                    );
                }
                source
            })
            .collect())
    }
}

/// Compare-and-swap one job reference in the state file
///
/// Holds an exclusive lock on `lock_path` for the whole read-modify-write.
/// The lock lives on a separate file because the state file itself is
/// replaced on every write. It is released when `lock` is dropped.
fn swap_job_reference(
    state_path: &Path,
    lock_path: &Path,
    id: &SourceId,
    expected: Option<&JobHandle>,
    record: JobRecord,
) -> StoreResult<bool> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    lock.lock()?;

    let mut state = JobState::read(state_path)?;
    let current = state.jobs.get(id).map(|existing| &existing.job);
    if current != expected {
        debug!(
            "Job reference for source {} was replaced concurrently ({:?} != {:?})",
            id, current, expected
        );
        return Ok(false);
    }

    state.jobs.insert(id.clone(), record);
    state.write_atomically(state_path)?;
    Ok(true)
}

#[async_trait]
impl SourceStore for FileSourceStore {
    async fn list_active_sources(&self) -> StoreResult<Vec<Source>> {
        self.load().await
    }

    async fn latest_mutation_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.modified_at().await.map(Some)
    }

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|source| &source.id == id))
    }

    async fn persist_job_reference(
        &self,
        id: &SourceId,
        expected: Option<&JobHandle>,
        job: &JobHandle,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if self.get_source(id).await?.is_none() {
            return Ok(false);
        }

        let state_path = self.state_path.clone();
        let lock_path = self.lock_path.clone();
        let id = id.clone();
        let expected = expected.cloned();
        let record = JobRecord {
            job: job.clone(),
            submitted_at,
        };

        tokio::task::spawn_blocking(move || {
            swap_job_reference(&state_path, &lock_path, &id, expected.as_ref(), record)
        })
        .await
        .map_err(|e| StoreError::unavailable(format!("job state writer failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const SOURCES: &str = r#"
[[sources]]
id = "roads"
name = "Road network"
kind = "postgis"
refresh = 1440
last_run_at = "2020-01-01T00:00:00Z"

[[sources]]
id = "parcels"
name = "Parcels"
kind = "shapefile"
refresh = -1
"#;

    /// Sources file inside its own directory, so the sidecar files are
    /// cleaned up with it
    fn sources_file(contents: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_lists_sources_from_file() {
        let (_dir, path) = sources_file(SOURCES);
        let store = FileSourceStore::new(&path);

        let sources = store.list_active_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, SourceId::from("roads"));
        assert_eq!(sources[0].kind, SourceKind::Postgis);
        assert_eq!(sources[0].refresh_minutes, 1440);
        assert_eq!(sources[0].last_run_at, Some(at(1)));
        assert_eq!(sources[0].current_job, None);
        assert_eq!(sources[1].refresh_minutes, -1);
        assert_eq!(sources[1].last_run_at, None);
    }

    #[tokio::test]
    async fn test_watermark_is_file_modification_time() {
        let (_dir, path) = sources_file(SOURCES);
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();

        let store = FileSourceStore::new(&path);
        assert_eq!(
            store.latest_mutation_time().await.unwrap(),
            Some(DateTime::<Utc>::from(modified))
        );
    }

    #[tokio::test]
    async fn test_job_reference_is_compare_and_swap() {
        let (_dir, path) = sources_file(SOURCES);
        let store = FileSourceStore::new(&path);
        let id = SourceId::from("roads");

        let job = JobHandle::new("job-1");
        assert!(store.persist_job_reference(&id, None, &job, at(5)).await.unwrap());
        assert!(
            !store
                .persist_job_reference(&id, None, &JobHandle::new("job-2"), at(5))
                .await
                .unwrap()
        );

        let source = store.get_source(&id).await.unwrap().unwrap();
        assert_eq!(source.current_job, Some(job.clone()));
        assert_eq!(source.job_submitted_at, Some(at(5)));
        assert_eq!(source.last_run_at, Some(at(5)));

        let replacement = JobHandle::new("job-3");
        assert!(
            store
                .persist_job_reference(&id, Some(&job), &replacement, at(6))
                .await
                .unwrap()
        );
        let source = store.get_source(&id).await.unwrap().unwrap();
        assert_eq!(source.current_job, Some(replacement));
    }

    #[tokio::test]
    async fn test_job_reference_does_not_move_the_watermark() {
        let (_dir, path) = sources_file(SOURCES);
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        let store = FileSourceStore::new(&path);
        let contents = std::fs::read_to_string(&path).unwrap();

        store
            .persist_job_reference(&SourceId::from("roads"), None, &JobHandle::new("job-1"), at(5))
            .await
            .unwrap();

        assert_eq!(
            store.latest_mutation_time().await.unwrap(),
            Some(DateTime::<Utc>::from(modified))
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
        assert!(store.state_path().exists());
    }

    #[tokio::test]
    async fn test_job_reference_is_shared_between_stores() {
        let (_dir, path) = sources_file(SOURCES);
        let first = FileSourceStore::new(&path);
        let second = FileSourceStore::new(&path);
        let id = SourceId::from("roads");
        let job = JobHandle::new("job-1");

        assert!(first.persist_job_reference(&id, None, &job, at(5)).await.unwrap());

        let seen = second.get_source(&id).await.unwrap().unwrap();
        assert_eq!(seen.current_job, Some(job.clone()));
        assert_eq!(seen.job_submitted_at, Some(at(5)));

        // The other store's view of "no job yet" is stale
        assert!(
            !second
                .persist_job_reference(&id, None, &JobHandle::new("job-2"), at(5))
                .await
                .unwrap()
        );
        let reread = FileSourceStore::new(&path);
        let source = reread.get_source(&id).await.unwrap().unwrap();
        assert_eq!(source.current_job, Some(job));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_swaps_have_one_winner() {
        let (_dir, path) = sources_file(SOURCES);
        let id = SourceId::from("parcels");

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = FileSourceStore::new(&path);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let job = JobHandle::new(format!("job-{n}"));
                store
                    .persist_job_reference(&id, None, &job, at(5))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_persisted() {
        let (_dir, path) = sources_file(SOURCES);
        let store = FileSourceStore::new(&path);
        let persisted = store
            .persist_job_reference(
                &SourceId::from("missing"),
                None,
                &JobHandle::new("job-1"),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!persisted);
        assert!(!store.state_path().exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_parse_error() {
        let (_dir, path) = sources_file("[[sources]]\nid = 3\n");
        let store = FileSourceStore::new(&path);
        assert!(matches!(
            store.list_active_sources().await,
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_state_file_is_a_parse_error() {
        let (_dir, path) = sources_file(SOURCES);
        let store = FileSourceStore::new(&path);
        std::fs::write(store.state_path(), "jobs = 3\n").unwrap();
        assert!(matches!(
            store.list_active_sources().await,
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSourceStore::new(dir.path().join("absent.toml"));
        assert!(matches!(
            store.latest_mutation_time().await,
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_sidecar_paths_sit_next_to_sources_file() {
        let store = FileSourceStore::new("/etc/geo/sources.toml");
        assert_eq!(store.state_path(), Path::new("/etc/geo/sources.jobs.toml"));
        assert_eq!(store.lock_path, Path::new("/etc/geo/sources.jobs.lock"));
    }
}
