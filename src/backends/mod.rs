//! Collaborator capabilities consumed by the scheduler core
//!
//! The core never talks to a database or a broker directly. It goes through
//! two seams:
//! - `SourceStore`: the authoritative list of sources and the job reference
//!   written on every submission
//! - `JobBackend`: the asynchronous worker pool that runs refresh jobs
//!
//! Concrete implementations live in the submodules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BackendResult, StoreResult};
use crate::models::{JobHandle, JobReport, RefreshMethod, Source, SourceId, SourceKind};

pub mod file_store;
pub mod http;
pub mod memory;

pub use file_store::FileSourceStore;
pub use http::HttpJobBackend;
pub use memory::{MemoryJobBackend, MemorySourceStore};

/// Authoritative store of sources
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Every source currently known to the store
    async fn list_active_sources(&self) -> StoreResult<Vec<Source>>;

    /// Time of the most recent configuration change (create, update or delete)
    async fn latest_mutation_time(&self) -> StoreResult<Option<DateTime<Utc>>>;

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>>;

    /// Compare-and-swap the source's job reference.
    ///
    /// Succeeds only while the recorded job still equals `expected`; on
    /// success `current_job`, `job_submitted_at` and `last_run_at` are set.
    /// Must not advance the mutation watermark.
    async fn persist_job_reference(
        &self,
        id: &SourceId,
        expected: Option<&JobHandle>,
        job: &JobHandle,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Work submitted to the job backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_id: SourceId,
    pub kind: SourceKind,
    pub method: RefreshMethod,
}

impl JobRequest {
    pub fn for_source(source: &Source, method: RefreshMethod) -> Self {
        Self {
            source_id: source.id.clone(),
            kind: source.kind,
            method,
        }
    }
}

/// Asynchronous job dispatch and status lookup
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit_job(&self, request: &JobRequest) -> BackendResult<JobHandle>;

    async fn query_job(&self, job: &JobHandle) -> BackendResult<JobReport>;
}
