//! Manually driven host doubles for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::value::{ObjectId, ObjectRef};
use super::{DeferredTask, Deferrer, Heap, Tag, UncaughtHandler, UnreachableHandler, WeakNotifier};
use crate::error::{Thrown, WeakError, WeakResult};

struct ManualRegistration {
    object: ObjectId,
    tag: Tag,
    handler: Arc<dyn UnreachableHandler>,
}

/// Notifier whose "collector" is the test itself.
///
/// Nothing is ever signalled unless the test calls [`fire`](Self::fire) or
/// [`fire_tag`](Self::fire_tag). Companions are allocated on the backing heap.
pub struct ManualNotifier {
    heap: Arc<Heap>,
    direct: bool,
    registrations: Mutex<Vec<ManualRegistration>>,
    /// companion -> target
    companions: Mutex<HashMap<ObjectId, ObjectId>>,
}

impl ManualNotifier {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            heap,
            direct: true,
            registrations: Mutex::new(Vec::new()),
            companions: Mutex::new(HashMap::new()),
        }
    }

    /// A notifier that refuses registrations on anything but companions
    pub fn companions_only(heap: Arc<Heap>) -> Self {
        Self {
            direct: false,
            ..Self::new(heap)
        }
    }

    pub fn registrations(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Signal every registration observing `target`, directly or through a
    /// companion. Returns the number of handlers called.
    pub fn fire(&self, target: ObjectId) -> usize {
        let handlers: Vec<(Tag, Arc<dyn UnreachableHandler>)> = {
            let companions = self.companions.lock();
            self.registrations
                .lock()
                .iter()
                .filter(|r| r.object == target || companions.get(&r.object) == Some(&target))
                .map(|r| (r.tag, Arc::clone(&r.handler)))
                .collect()
        };
        for (tag, handler) in &handlers {
            handler.on_unreachable(*tag);
        }
        handlers.len()
    }

    /// Signal the registrations carrying `tag`
    pub fn fire_tag(&self, tag: Tag) -> usize {
        let handlers: Vec<Arc<dyn UnreachableHandler>> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in &handlers {
            handler.on_unreachable(tag);
        }
        handlers.len()
    }
}

impl WeakNotifier for ManualNotifier {
    fn register_weak(
        &self,
        object: &ObjectRef,
        tag: Tag,
        handler: Arc<dyn UnreachableHandler>,
    ) -> WeakResult<()> {
        if !self.direct && !object.is_companion() {
            return Err(WeakError::Unsupported(object.id()));
        }
        self.registrations.lock().push(ManualRegistration {
            object: object.id(),
            tag,
            handler,
        });
        Ok(())
    }

    fn attach_companion(&self, target: &ObjectRef) -> WeakResult<ObjectRef> {
        let companion = self.heap.attach_companion(target)?;
        self.companions.lock().insert(companion.id(), target.id());
        Ok(companion)
    }
}

/// Deferrer that queues tasks until the test runs them
#[derive(Default)]
pub struct ManualDeferrer {
    tasks: Mutex<VecDeque<DeferredTask>>,
}

impl ManualDeferrer {
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Run queued tasks, including ones they queue, until none are left.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the lock before running so tasks can defer more work
            let Some(task) = self.tasks.lock().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }
}

impl Deferrer for ManualDeferrer {
    fn defer_to_safe_point(&self, task: DeferredTask) {
        self.tasks.lock().push_back(task);
    }
}

/// Collects uncaught failures
#[derive(Default)]
pub struct RecordingUncaught {
    errors: Mutex<Vec<Thrown>>,
}

impl RecordingUncaught {
    pub fn errors(&self) -> Vec<Thrown> {
        self.errors.lock().clone()
    }
}

impl UncaughtHandler for RecordingUncaught {
    fn report_uncaught(&self, error: Thrown) {
        self.errors.lock().push(error);
    }
}
