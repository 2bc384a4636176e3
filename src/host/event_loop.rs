//! Cooperative event loop: safe-point tasks, microtasks and the uncaught
//! failure channel.
//!
//! ## Turn structure
//!
//! ```text
//! run_once()
//!   ├── drain microtasks
//!   └── for each immediate queued before the turn started
//!         ├── run it
//!         ├── stop the turn if a fatal uncaught failure was reported
//!         └── drain microtasks
//! ```
//!
//! Immediates queued while a turn runs wait for the next turn, so a task
//! deferred from inside the collector always runs after the code that
//! triggered the collection has returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::SegQueue;
use flume::{Receiver, Sender};
use parking_lot::Mutex;

use super::{DeferredTask, Deferrer, UncaughtHandler};
use crate::error::{Thrown, WeakError, WeakResult};

/// What the host does with a failure nobody can catch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UncaughtPolicy {
    /// Stop the current turn and surface the failure to the loop driver
    #[default]
    Fatal,
    /// Log the failure and keep running
    Log,
}

/// Event loop configuration
#[derive(Debug, Clone, Default)]
pub struct EventLoopConfig {
    /// Default: [`UncaughtPolicy::Fatal`]
    pub uncaught: UncaughtPolicy,
}

impl EventLoopConfig {
    pub fn with_uncaught(mut self, policy: UncaughtPolicy) -> Self {
        self.uncaught = policy;
        self
    }
}

/// Single-threaded cooperative scheduler
pub struct EventLoop {
    config: EventLoopConfig,
    immediate_sender: Sender<DeferredTask>,
    immediate_receiver: Receiver<DeferredTask>,
    microtasks: SegQueue<DeferredTask>,
    /// Fatal failures not yet surfaced to the driver
    uncaught: Mutex<VecDeque<Thrown>>,
    turns: AtomicU64,
    tasks_run: AtomicU64,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Self {
        let (immediate_sender, immediate_receiver) = flume::unbounded();
        Self {
            config,
            immediate_sender,
            immediate_receiver,
            microtasks: SegQueue::new(),
            uncaught: Mutex::new(VecDeque::new()),
            turns: AtomicU64::new(0),
            tasks_run: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    /// Queue a task on the immediate queue.
    pub fn set_immediate(&self, task: impl FnOnce() + Send + 'static) {
        self.push_immediate(Box::new(task));
    }

    /// Queue a microtask; runs before the next immediate.
    pub fn next_tick(&self, task: impl FnOnce() + Send + 'static) {
        self.microtasks.push(Box::new(task));
    }

    fn push_immediate(&self, task: DeferredTask) {
        // The loop owns the receiver, so the channel cannot disconnect
        if self.immediate_sender.send(task).is_err() {
            tracing::warn!("immediate queue disconnected, dropping task");
        }
    }

    /// Number of queued immediates, microtasks and fatal failures not yet
    /// surfaced
    pub fn pending(&self) -> usize {
        self.immediate_receiver.len() + self.microtasks.len() + self.uncaught.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    /// Run one turn; returns the number of immediates run.
    ///
    /// With [`UncaughtPolicy::Fatal`] the turn stops right after the task
    /// that reported a failure, and the failure is returned. Tasks not yet
    /// run stay queued. A task that reported several failures surfaces one
    /// per turn, each before anything else runs.
    pub fn run_once(&self) -> WeakResult<usize> {
        self.turns.fetch_add(1, Ordering::Relaxed);
        self.surface_uncaught()?;
        self.run_microtasks()?;

        let due = self.immediate_receiver.len();
        let mut ran = 0;
        for _ in 0..due {
            let Ok(task) = self.immediate_receiver.try_recv() else {
                break;
            };
            task();
            ran += 1;
            self.tasks_run.fetch_add(1, Ordering::Relaxed);
            self.surface_uncaught()?;
            self.run_microtasks()?;
        }

        tracing::trace!(turn = self.turns(), ran, "event loop turn finished");
        Ok(ran)
    }

    /// Run turns until nothing is queued; returns the immediates run.
    pub fn run_until_idle(&self) -> WeakResult<usize> {
        let mut total = 0;
        while !self.is_idle() {
            total += self.run_once()?;
        }
        Ok(total)
    }

    fn run_microtasks(&self) -> WeakResult<()> {
        while let Some(task) = self.microtasks.pop() {
            task();
            self.surface_uncaught()?;
        }
        Ok(())
    }

    fn surface_uncaught(&self) -> WeakResult<()> {
        match self.uncaught.lock().pop_front() {
            Some(error) => Err(WeakError::Uncaught(error)),
            None => Ok(()),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferrer for EventLoop {
    fn defer_to_safe_point(&self, task: DeferredTask) {
        self.push_immediate(task);
    }
}

impl UncaughtHandler for EventLoop {
    fn report_uncaught(&self, error: Thrown) {
        match self.config.uncaught {
            UncaughtPolicy::Fatal => self.uncaught.lock().push_back(error),
            UncaughtPolicy::Log => {
                tracing::error!(error = %error, "uncaught exception in deferred task");
            }
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("turns", &self.turns())
            .field("tasks_run", &self.tasks_run.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn tasks_queued_during_a_turn_wait_for_the_next() {
        let event_loop = Arc::new(EventLoop::new());
        let log = recorder();

        let inner_loop = Arc::clone(&event_loop);
        let inner_log = Arc::clone(&log);
        event_loop.set_immediate(move || {
            inner_log.lock().push("outer");
            let nested_log = Arc::clone(&inner_log);
            inner_loop.set_immediate(move || nested_log.lock().push("nested"));
        });

        assert_eq!(event_loop.run_once().unwrap(), 1);
        assert_eq!(*log.lock(), vec!["outer"]);
        assert_eq!(event_loop.run_once().unwrap(), 1);
        assert_eq!(*log.lock(), vec!["outer", "nested"]);
        assert!(event_loop.is_idle());
    }

    #[test]
    fn microtasks_run_before_immediates() {
        let event_loop = EventLoop::new();
        let log = recorder();

        let l = Arc::clone(&log);
        event_loop.set_immediate(move || l.lock().push("immediate"));
        let l = Arc::clone(&log);
        event_loop.next_tick(move || l.lock().push("tick"));

        event_loop.run_until_idle().unwrap();
        assert_eq!(*log.lock(), vec!["tick", "immediate"]);
    }

    #[test]
    fn fatal_failures_stop_the_turn() {
        let event_loop = Arc::new(EventLoop::new());
        let log = recorder();

        let reporter = Arc::clone(&event_loop);
        event_loop.set_immediate(move || reporter.report_uncaught(Thrown::new("boom")));
        let l = Arc::clone(&log);
        event_loop.set_immediate(move || l.lock().push("after"));

        let err = event_loop.run_once().unwrap_err();
        assert!(matches!(err, WeakError::Uncaught(ref t) if t.message() == "boom"));
        assert!(log.lock().is_empty());
        assert_eq!(event_loop.pending(), 1);

        event_loop.run_once().unwrap();
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn every_fatal_failure_surfaces_before_the_loop_goes_idle() {
        let event_loop = Arc::new(EventLoop::new());
        let log = recorder();

        let reporter = Arc::clone(&event_loop);
        event_loop.set_immediate(move || {
            reporter.report_uncaught(Thrown::new("first"));
            reporter.report_uncaught(Thrown::new("second"));
        });
        let l = Arc::clone(&log);
        event_loop.set_immediate(move || l.lock().push("after"));

        let err = event_loop.run_until_idle().unwrap_err();
        assert!(matches!(err, WeakError::Uncaught(ref t) if t.message() == "first"));
        assert!(!event_loop.is_idle());

        let err = event_loop.run_until_idle().unwrap_err();
        assert!(matches!(err, WeakError::Uncaught(ref t) if t.message() == "second"));
        assert!(log.lock().is_empty());

        assert_eq!(event_loop.run_until_idle().unwrap(), 1);
        assert_eq!(*log.lock(), vec!["after"]);
        assert!(event_loop.is_idle());
    }

    #[test]
    fn logged_failures_do_not_stop_the_turn() {
        let event_loop = Arc::new(EventLoop::with_config(
            EventLoopConfig::default().with_uncaught(UncaughtPolicy::Log),
        ));
        let log = recorder();

        let reporter = Arc::clone(&event_loop);
        event_loop.set_immediate(move || reporter.report_uncaught(Thrown::new("boom")));
        let l = Arc::clone(&log);
        event_loop.set_immediate(move || l.lock().push("after"));

        assert_eq!(event_loop.run_once().unwrap(), 2);
        assert_eq!(*log.lock(), vec!["after"]);
    }
}
