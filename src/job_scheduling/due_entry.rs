//! Due check for a single schedulable source
//!
//! An `Entry` is an immutable snapshot of the scheduling state of one source.
//! Rescheduling never mutates an entry: `advance` hands back a new one and the
//! old value is dropped together with the heap event that carried it.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::errors::SourceError;
use crate::models::{Source, SourceId};
use crate::utils::time::saturating_add;

/// Re-check delays handed out by the due check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Used for every source with a positive refresh interval
    pub due: Duration,
    /// Used for sources whose automatic refresh is disabled
    pub disabled: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for PollIntervals {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            due: config.due_poll_interval,
            disabled: config.disabled_poll_interval,
        }
    }
}

/// Result of a due check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueState {
    pub is_due: bool,
    pub next_check: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    source_id: SourceId,
    refresh_minutes: i64,
    interval: Option<TimeDelta>,
    last_run_at: Option<DateTime<Utc>>,
    run_count: u64,
}

impl Entry {
    /// Build an entry for a source, rejecting intervals that cannot be represented
    pub fn from_source(source: &Source) -> Result<Self, SourceError> {
        Ok(Self {
            source_id: source.id.clone(),
            refresh_minutes: source.refresh_minutes,
            interval: source.refresh_interval()?,
            last_run_at: source.last_run_at,
            run_count: 0,
        })
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn refresh_minutes(&self) -> i64 {
        self.refresh_minutes
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Earliest instant at which the entry becomes due, `None` when disabled
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        let interval = self.interval?;
        Some(match self.last_run_at {
            Some(last_run_at) => saturating_add(last_run_at, interval),
            None => DateTime::<Utc>::MIN_UTC,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>, intervals: &PollIntervals) -> DueState {
        match self.next_run_at() {
            None => DueState {
                is_due: false,
                next_check: intervals.disabled,
            },
            Some(next_run_at) => DueState {
                is_due: now >= next_run_at,
                next_check: intervals.due,
            },
        }
    }

    /// The entry after a dispatch attempt at `now`
    pub fn advance(&self, now: DateTime<Utc>) -> Entry {
        Entry {
            last_run_at: Some(now),
            run_count: self.run_count + 1,
            ..self.clone()
        }
    }

    /// Carry scheduling history over from the entry this one replaces
    pub(crate) fn inherit(self, previous: &Entry) -> Entry {
        let last_run_at = match (self.last_run_at, previous.last_run_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Entry {
            last_run_at,
            run_count: previous.run_count,
            ..self
        }
    }
}
