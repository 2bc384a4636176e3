//! Host environment interfaces.
//!
//! The weak reference core only talks to the host through the traits below:
//! weak notification registration, deferral to a safe point, and the
//! uncaught-failure channel. `Heap` and `EventLoop` are the in-process
//! implementations; `mocks` provides manual drivers for unit tests.

pub mod event_loop;
pub mod heap;
pub mod value;

#[cfg(test)]
pub mod mocks;

use std::fmt;
use std::sync::Arc;

use crate::error::{Thrown, WeakResult};
use value::ObjectRef;

pub use event_loop::{EventLoop, EventLoopConfig, UncaughtPolicy};
pub use heap::{CollectionReport, Heap, HeapConfig, HeapStats};
pub use value::{NativeFn, ObjectId, ObjectKind, PropertyKey, Symbol, Value, WeakObject};

/// Correlation data handed to the collector with each weak registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u64);

impl Tag {
    pub const fn from_raw(raw: u64) -> Self {
        Tag(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag:{}", self.0)
    }
}

/// Receiver of the collector's "object about to be reclaimed" signal.
///
/// Called inside the collector's own context: implementations must not run
/// user code, allocate host objects or start another collection.
pub trait UnreachableHandler: Send + Sync {
    fn on_unreachable(&self, tag: Tag);
}

/// The host's weak notification primitive
pub trait WeakNotifier: Send + Sync {
    /// Ask to be told, at most once, when `object` becomes unreachable.
    ///
    /// Hosts that cannot attach a notification directly to `object` return
    /// [`WeakError::Unsupported`](crate::WeakError::Unsupported).
    fn register_weak(
        &self,
        object: &ObjectRef,
        tag: Tag,
        handler: Arc<dyn UnreachableHandler>,
    ) -> WeakResult<()>;

    /// Create a companion object kept alive by `target` and by nothing else.
    ///
    /// The companion must never reach `target`. Callers must not retain the
    /// returned reference beyond registering it.
    fn attach_companion(&self, target: &ObjectRef) -> WeakResult<ObjectRef>;
}

/// Work queued for the next safe point
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// The host's cooperative scheduling primitive
pub trait Deferrer: Send + Sync {
    /// Run `task` once, after the current collection and call stack unwind.
    fn defer_to_safe_point(&self, task: DeferredTask);
}

/// The host's top-level channel for failures nobody can catch
pub trait UncaughtHandler: Send + Sync {
    fn report_uncaught(&self, error: Thrown);
}
