//! Heap based tick loop
//!
//! `HeapScheduler::tick` is driven by a host loop that sleeps for the delay it
//! returns. Each tick:
//! 1. resynchronizes the entry set when the source store changed
//! 2. pops every event whose check time has arrived
//! 3. re-evaluates those entries and dispatches the due ones through the guard
//! 4. pushes a fresh event for each of them
//!
//! Membership changes rebuild the heap from scratch. Events are never updated
//! in place.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::due_entry::{Entry, PollIntervals};
use super::synchronizer::SourceSetSynchronizer;
use super::types::{HeapEvent, ScheduledCheck};
use crate::backends::SourceStore;
use crate::config::SchedulerConfig;
use crate::execution::{ExecutionGuard, Submission};
use crate::models::{RefreshMethod, SourceId};
use crate::utils::time::{elapsed_between, saturating_add, to_time_delta};

pub struct HeapScheduler {
    synchronizer: SourceSetSynchronizer,
    guard: Arc<ExecutionGuard>,
    config: SchedulerConfig,
    intervals: PollIntervals,
    heap: BinaryHeap<Reverse<HeapEvent>>,
    /// (id, interval) pairs of the last applied snapshot, `None` until the first one
    membership: Option<Vec<(SourceId, i64)>>,
    counter: u64,
}

impl HeapScheduler {
    pub fn new(
        store: Arc<dyn SourceStore>,
        guard: Arc<ExecutionGuard>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            synchronizer: SourceSetSynchronizer::new(store),
            guard,
            intervals: PollIntervals::from(&config),
            config,
            heap: BinaryHeap::new(),
            membership: None,
            counter: 0,
        }
    }

    /// Number of scheduled entries
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pending checks in the order they will be evaluated
    pub fn scheduled(&self) -> Vec<ScheduledCheck> {
        let mut events: Vec<&HeapEvent> = self.heap.iter().map(|Reverse(event)| event).collect();
        events.sort();
        events.into_iter().map(ScheduledCheck::from).collect()
    }

    /// Advance the schedule to `now` and return the delay until the next tick
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        self.maybe_resync(now).await;

        let Some(Reverse(earliest)) = self.heap.peek() else {
            trace!("No scheduled sources, idling for {:?}", self.config.idle_delay);
            return self.config.idle_delay;
        };

        if !earliest.is_ready(now) {
            let remaining = elapsed_between(now, earliest.next_check);
            trace!("Next check for {} in {:?}", earliest.entry.source_id(), remaining);
            return remaining
                .min(self.suggested_delay())
                .max(self.config.min_tick_delay);
        }

        let mut ready = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(event)| event.is_ready(now)) {
            if let Some(Reverse(event)) = self.heap.pop() {
                ready.push(event);
            }
        }

        for event in ready {
            let entry = self.evaluate(event.entry, now).await;
            let next_check = entry.is_due(now, &self.intervals).next_check;
            self.push(saturating_add(now, to_time_delta(next_check)), entry);
        }

        self.suggested_delay()
    }

    /// Re-check one popped entry, dispatching it when due.
    /// Returns the entry to reschedule.
    async fn evaluate(&self, entry: Entry, now: DateTime<Utc>) -> Entry {
        let state = entry.is_due(now, &self.intervals);
        if !state.is_due {
            debug!("Source {} not due yet", entry.source_id());
            return entry;
        }

        debug!(
            "Source {} is due (run {}), dispatching",
            entry.source_id(),
            entry.run_count() + 1
        );
        match self
            .guard
            .try_submit(entry.source_id(), RefreshMethod::RefreshData, false, now)
            .await
        {
            Ok(Submission::Submitted(_)) => entry.advance(now),
            Ok(Submission::Rejected(reason)) => {
                debug!("Dispatch for source {} skipped: {}", entry.source_id(), reason);
                entry.advance(now)
            }
            // Stays due, retried on the next short poll
            Err(e) => {
                warn!("Failed to dispatch source {}: {}", entry.source_id(), e);
                entry
            }
        }
    }

    /// Fixed tick budget shared among all active entries, floored
    fn suggested_delay(&self) -> Duration {
        let active = u32::try_from(self.heap.len().max(1)).unwrap_or(u32::MAX);
        (self.config.tick_budget / active).max(self.config.min_tick_delay)
    }

    fn push(&mut self, next_check: DateTime<Utc>, entry: Entry) {
        self.heap
            .push(Reverse(HeapEvent::new(next_check, self.counter, entry)));
        self.counter += 1;
    }

    async fn maybe_resync(&mut self, now: DateTime<Utc>) {
        if self.membership.is_some() && !self.synchronizer.should_resync().await {
            return;
        }

        match self.synchronizer.snapshot(now).await {
            Ok(entries) => self.rebuild(entries, now),
            Err(e) => warn!("Source resync failed, keeping current schedule: {}", e),
        }
    }

    /// Replace the heap when the set of (source, interval) pairs changed
    fn rebuild(&mut self, entries: Vec<Entry>, now: DateTime<Utc>) {
        let mut membership: Vec<(SourceId, i64)> = entries
            .iter()
            .map(|entry| (entry.source_id().clone(), entry.refresh_minutes()))
            .collect();
        membership.sort();

        if self.membership.as_ref() == Some(&membership) {
            debug!("Source set unchanged, keeping {} scheduled entries", self.heap.len());
            return;
        }

        let previous: HashMap<SourceId, Entry> = std::mem::take(&mut self.heap)
            .into_iter()
            .map(|Reverse(event)| (event.entry.source_id().clone(), event.entry))
            .collect();

        for entry in entries {
            let entry = match previous.get(entry.source_id()) {
                Some(old) => entry.inherit(old),
                None => entry,
            };
            self.push(now, entry);
        }

        info!(
            "Rebuilt schedule with {} sources ({} before)",
            self.heap.len(),
            previous.len()
        );
        self.membership = Some(membership);
    }

    /// Host loop: tick, sleep for the returned delay, repeat until cancelled
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        info!("Starting source refresh scheduler");

        loop {
            let delay = self.tick(Utc::now()).await;
            trace!("Sleeping {:?} until next tick", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancellation_token.cancelled() => {
                    info!("Scheduler received cancellation signal, shutting down");
                    break;
                }
            }
        }

        info!("Source refresh scheduler stopped");
    }
}
