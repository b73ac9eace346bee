//! Reconciles the scheduled entry set with the authoritative source store

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::due_entry::Entry;
use crate::backends::SourceStore;
use crate::errors::StoreResult;

pub struct SourceSetSynchronizer {
    store: Arc<dyn SourceStore>,
    last_sync: Option<DateTime<Utc>>,
}

impl SourceSetSynchronizer {
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        Self {
            store,
            last_sync: None,
        }
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Whether the store changed since the last successful snapshot.
    ///
    /// Fails closed: an unreachable store reports no change so the current
    /// schedule is kept.
    pub async fn should_resync(&self) -> bool {
        let Some(last_sync) = self.last_sync else {
            return true;
        };

        match self.store.latest_mutation_time().await {
            Ok(Some(watermark)) => {
                let changed = watermark > last_sync;
                if changed {
                    debug!(
                        "Source store changed at {} (last sync {})",
                        watermark, last_sync
                    );
                }
                changed
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read source store watermark, keeping schedule: {}", e);
                false
            }
        }
    }

    /// Entries for every source with a positive refresh interval, longest
    /// interval first. Sources with malformed intervals are skipped.
    ///
    /// The sync time only advances when the store could be read.
    pub async fn snapshot(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Entry>> {
        let mut sources = self.store.list_active_sources().await?;
        sources.retain(|source| source.refresh_minutes > 0);
        sources.sort_by(|a, b| b.refresh_minutes.cmp(&a.refresh_minutes));

        let entries: Vec<Entry> = sources
            .iter()
            .filter_map(|source| match Entry::from_source(source) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping source {}: {}", source.id, e);
                    None
                }
            })
            .collect();

        self.last_sync = Some(now);
        info!("Synchronized {} scheduled sources", entries.len());
        Ok(entries)
    }
}
