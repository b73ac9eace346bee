//! Domain models shared by the scheduler, the execution guard and the backends

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SourceError;

/// Stable identity of a source (its slug in the authoritative store)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque handle of a job accepted by the job backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of data source; only the job backend cares about it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Postgis,
    Geojson,
    Shapefile,
    Csv,
    Command,
    Wmts,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Postgis => "postgis",
            SourceKind::Geojson => "geojson",
            SourceKind::Shapefile => "shapefile",
            SourceKind::Csv => "csv",
            SourceKind::Command => "command",
            SourceKind::Wmts => "wmts",
        };
        f.write_str(name)
    }
}

/// Method the worker runs against the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMethod {
    /// Re-import every record of the source
    RefreshData,
    /// Re-run field type inference on a sample of records
    UpdateFields,
}

impl fmt::Display for RefreshMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshMethod::RefreshData => f.write_str("refresh_data"),
            RefreshMethod::UpdateFields => f.write_str("update_fields"),
        }
    }
}

/// A schedulable source as seen by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub kind: SourceKind,
    /// Refresh interval in minutes; zero or negative disables automatic refresh
    pub refresh_minutes: i64,
    /// Time of the last dispatch attempt
    pub last_run_at: Option<DateTime<Utc>>,
    pub current_job: Option<JobHandle>,
    pub job_submitted_at: Option<DateTime<Utc>>,
    /// Mutation watermark of the record
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Create a source that has never run and has no job recorded
    pub fn new<I: Into<SourceId>, N: Into<String>>(
        id: I,
        name: N,
        kind: SourceKind,
        refresh_minutes: i64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            refresh_minutes,
            last_run_at: None,
            current_job: None,
            job_submitted_at: None,
            updated_at,
        }
    }

    pub fn with_last_run_at(mut self, last_run_at: DateTime<Utc>) -> Self {
        self.last_run_at = Some(last_run_at);
        self
    }

    pub fn with_job(mut self, job: JobHandle, submitted_at: DateTime<Utc>) -> Self {
        self.current_job = Some(job);
        self.job_submitted_at = Some(submitted_at);
        self
    }

    /// Refresh interval, `None` when automatic refresh is disabled
    pub fn refresh_interval(&self) -> Result<Option<Duration>, SourceError> {
        if self.refresh_minutes <= 0 {
            return Ok(None);
        }

        Duration::try_minutes(self.refresh_minutes)
            .map(Some)
            .ok_or_else(|| SourceError::InvalidInterval {
                source_id: self.id.to_string(),
                minutes: self.refresh_minutes,
            })
    }
}

/// Raw job state in the job broker's vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteJobState {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
    Other(String),
}

impl From<String> for RemoteJobState {
    fn from(state: String) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "PENDING" => RemoteJobState::Pending,
            "RECEIVED" => RemoteJobState::Received,
            "STARTED" => RemoteJobState::Started,
            "RETRY" => RemoteJobState::Retry,
            "SUCCESS" => RemoteJobState::Success,
            "FAILURE" => RemoteJobState::Failure,
            "REVOKED" => RemoteJobState::Revoked,
            _ => RemoteJobState::Other(state),
        }
    }
}

impl From<RemoteJobState> for String {
    fn from(state: RemoteJobState) -> Self {
        match state {
            RemoteJobState::Pending => "PENDING".to_string(),
            RemoteJobState::Received => "RECEIVED".to_string(),
            RemoteJobState::Started => "STARTED".to_string(),
            RemoteJobState::Retry => "RETRY".to_string(),
            RemoteJobState::Success => "SUCCESS".to_string(),
            RemoteJobState::Failure => "FAILURE".to_string(),
            RemoteJobState::Revoked => "REVOKED".to_string(),
            RemoteJobState::Other(state) => state,
        }
    }
}

/// Report returned by the job backend for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub state: RemoteJobState,
    #[serde(default, rename = "done")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl JobReport {
    pub fn new(state: RemoteJobState) -> Self {
        Self {
            state,
            finished_at: None,
            result: None,
        }
    }
}

/// Normalized job status used by the execution guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    /// No job recorded, or its state could not be determined
    Unknown,
}

impl JobStatus {
    /// Only explicit success and failure are terminal; everything else is still running
    pub fn from_remote(state: &RemoteJobState) -> Self {
        match state {
            RemoteJobState::Success => JobStatus::Succeeded,
            RemoteJobState::Failure => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    /// Whether a new job may be submitted without the stale override
    pub fn allows_submission(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}
