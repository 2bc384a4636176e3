//! Two-phase finalization: a synchronous flip inside the collector, then a
//! deferred callback drain at the next safe point.
//!
//! ```text
//! Alive ──(collector: on_unreachable)──▶ NearDeath ──(task queued)──▶ Deferred
//!                                                                        │
//!                                                   (safe point: drain)  ▼
//!                                                                    Finalized
//! ```
//!
//! The collector-side half only clears the target, records the transition
//! and queues one task. User callbacks run exclusively from that task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::callbacks;
use crate::host::value::Value;
use crate::host::{Deferrer, Tag, UncaughtHandler, UnreachableHandler};
use crate::tracker::Record;

#[derive(Debug, Default)]
struct SchedulerCounters {
    near_death_signals: AtomicUsize,
    ignored_signals: AtomicUsize,
    drained: AtomicUsize,
    callbacks_invoked: AtomicUsize,
    callback_failures: AtomicUsize,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Observations still waiting for their target to die
    pub pending: usize,
    pub near_death_signals: usize,
    /// Signals for unknown or already finalized tags
    pub ignored_signals: usize,
    /// Handles whose callbacks have been drained
    pub drained: usize,
    pub callbacks_invoked: usize,
    pub callback_failures: usize,
}

/// Receives the collector's unreachable signals and drains callbacks later
pub struct FinalizationScheduler {
    /// Strong bookkeeping for every observation not yet signalled
    pending: DashMap<Tag, Arc<Record>>,
    deferrer: Arc<dyn Deferrer>,
    uncaught: Arc<dyn UncaughtHandler>,
    counters: Arc<SchedulerCounters>,
}

impl FinalizationScheduler {
    pub fn new(deferrer: Arc<dyn Deferrer>, uncaught: Arc<dyn UncaughtHandler>) -> Self {
        Self {
            pending: DashMap::new(),
            deferrer,
            uncaught,
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    pub(crate) fn track(&self, record: Arc<Record>) {
        self.pending.insert(record.tag(), record);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.pending.len(),
            near_death_signals: self.counters.near_death_signals.load(Ordering::Relaxed),
            ignored_signals: self.counters.ignored_signals.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
            callbacks_invoked: self.counters.callbacks_invoked.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
        }
    }
}

impl UnreachableHandler for FinalizationScheduler {
    fn on_unreachable(&self, tag: Tag) {
        let Some((_, record)) = self.pending.remove(&tag) else {
            self.counters.ignored_signals.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(tag = %tag, "ignoring unreachable signal for unknown tag");
            return;
        };
        if !record.mark_near_death() {
            self.counters.ignored_signals.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(tag = %tag, state = ?record.state(), "handle already past near-death");
            return;
        }
        self.counters
            .near_death_signals
            .fetch_add(1, Ordering::Relaxed);

        record.mark_deferred();
        let uncaught = Arc::clone(&self.uncaught);
        let counters = Arc::clone(&self.counters);
        self.deferrer
            .defer_to_safe_point(Box::new(move || drain(&record, &*uncaught, &counters)));
    }
}

/// Safe-point half: run the callbacks registered so far, then finalize.
fn drain(record: &Record, uncaught: &dyn UncaughtHandler, counters: &SchedulerCounters) {
    let callbacks = record.callbacks().take_all();
    let argument = Value::from(record.target_id());
    let outcome = callbacks::fire(&callbacks, &argument, uncaught);
    record.mark_finalized();

    counters.drained.fetch_add(1, Ordering::Relaxed);
    counters
        .callbacks_invoked
        .fetch_add(outcome.invoked, Ordering::Relaxed);
    counters
        .callback_failures
        .fetch_add(outcome.failed, Ordering::Relaxed);
    tracing::debug!(
        tag = %record.tag(),
        target = %record.target_id(),
        invoked = outcome.invoked,
        failed = outcome.failed,
        "weak callbacks drained"
    );
}

impl std::fmt::Debug for FinalizationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationScheduler")
            .field("pending", &self.pending.len())
            .finish()
    }
}
