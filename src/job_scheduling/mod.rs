//! Source refresh scheduling
//!
//! The system is built around four components:
//! - `Entry`: due check for one source, replaced on every reschedule
//! - `SourceSetSynchronizer`: watermark driven resync against the source store
//! - `HeapScheduler`: min-heap tick loop dispatching due sources through the guard
//! - `RefreshApi`: manual triggers and status reports sharing the same guard

pub mod api;
pub mod due_entry;
pub mod heap_scheduler;
pub mod synchronizer;
pub mod types;

pub use api::{RefreshApi, RefreshSummary, SourceStatusReport};
pub use due_entry::{DueState, Entry, PollIntervals};
pub use heap_scheduler::HeapScheduler;
pub use synchronizer::SourceSetSynchronizer;
pub use types::*;
