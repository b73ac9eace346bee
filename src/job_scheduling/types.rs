//! Job scheduling type definitions

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use super::due_entry::Entry;
use crate::models::SourceId;

/// One scheduled re-evaluation of an entry
#[derive(Debug, Clone)]
pub struct HeapEvent {
    /// When the entry should be evaluated again
    pub next_check: DateTime<Utc>,
    /// Monotonically increasing insertion counter, breaks ties in FIFO order
    pub priority: u64,
    pub entry: Entry,
}

impl HeapEvent {
    pub fn new(next_check: DateTime<Utc>, priority: u64, entry: Entry) -> Self {
        Self {
            next_check,
            priority,
            entry,
        }
    }

    /// Check if this event should be evaluated now
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_check <= now
    }
}

impl PartialEq for HeapEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEvent {}

impl PartialOrd for HeapEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEvent {
    /// Events are ordered by check time, then by insertion order.
    /// The entry itself never takes part in the comparison.
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_check
            .cmp(&other.next_check)
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

/// Read-only view of one heap slot, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledCheck {
    pub source_id: SourceId,
    pub next_check: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
}

impl From<&HeapEvent> for ScheduledCheck {
    fn from(event: &HeapEvent) -> Self {
        Self {
            source_id: event.entry.source_id().clone(),
            next_check: event.next_check,
            last_run_at: event.entry.last_run_at(),
            run_count: event.entry.run_count(),
        }
    }
}
