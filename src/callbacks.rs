//! Per-handle callback lists.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{WeakError, WeakResult};
use crate::host::value::{ObjectRef, Value};
use crate::host::UncaughtHandler;

/// Ordered list of reclamation callbacks attached to one weak reference.
///
/// Clones share the same list: a `CallbackList` obtained from
/// [`WeakManager::callbacks`](crate::WeakManager::callbacks) is a live view,
/// and callbacks pushed through it fire like any other registration.
#[derive(Clone, Default)]
pub struct CallbackList {
    inner: Arc<Mutex<Vec<ObjectRef>>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback. Duplicates are kept and fire once per registration.
    pub fn push(&self, callback: &Value) -> WeakResult<()> {
        let function = callable(callback)?;
        self.inner.lock().push(function.clone());
        Ok(())
    }

    /// Remove every registration of `callback`; returns whether any existed.
    pub fn remove(&self, callback: &Value) -> WeakResult<bool> {
        let function = callable(callback)?;
        let mut callbacks = self.inner.lock();
        let before = callbacks.len();
        callbacks.retain(|registered| !registered.ptr_eq(function));
        Ok(callbacks.len() != before)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, callback: &Value) -> bool {
        match callback.as_object() {
            Some(function) => self
                .inner
                .lock()
                .iter()
                .any(|registered| registered.ptr_eq(function)),
            None => false,
        }
    }

    /// Snapshot of the current registrations, in order
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner
            .lock()
            .iter()
            .cloned()
            .map(Value::Object)
            .collect()
    }

    /// Empty the list, handing its contents to the drain.
    pub(crate) fn take_all(&self) -> Vec<ObjectRef> {
        std::mem::take(&mut *self.inner.lock())
    }
}

impl fmt::Debug for CallbackList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.len())
            .finish()
    }
}

fn callable(value: &Value) -> WeakResult<&ObjectRef> {
    value.as_callable().ok_or_else(|| {
        WeakError::Type(format!(
            "callback should be function, got {}",
            value.type_name()
        ))
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FireOutcome {
    pub invoked: usize,
    pub failed: usize,
}

/// Invoke `callbacks` in order with `argument`.
///
/// A failing callback is reported to `uncaught` and does not stop the rest.
pub(crate) fn fire(
    callbacks: &[ObjectRef],
    argument: &Value,
    uncaught: &dyn UncaughtHandler,
) -> FireOutcome {
    let mut outcome = FireOutcome::default();
    for callback in callbacks {
        outcome.invoked += 1;
        if let Err(thrown) = callback.call(std::slice::from_ref(argument)) {
            outcome.failed += 1;
            tracing::debug!(callback = %callback.id(), error = %thrown, "weak callback threw");
            uncaught.report_uncaught(thrown);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Thrown;
    use crate::host::mocks::RecordingUncaught;
    use crate::host::Heap;

    #[test]
    fn rejects_non_callables() {
        let heap = Heap::new();
        let list = CallbackList::new();
        let plain = heap.alloc_object().unwrap();

        for value in [Value::Undefined, Value::from(1), Value::from("fn"), Value::from(plain)] {
            let err = list.push(&value).unwrap_err();
            assert!(matches!(err, WeakError::Type(_)), "{:?}", value);
        }
        assert!(list.is_empty());
    }

    #[test]
    fn clones_share_registrations() {
        let heap = Heap::new();
        let list = CallbackList::new();
        let view = list.clone();
        let f = Value::from(heap.alloc_function(|_| Ok(Value::Undefined)).unwrap());

        list.push(&f).unwrap();
        view.push(&f).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(view.to_vec(), vec![f.clone(), f.clone()]);
        assert!(view.remove(&f).unwrap());
        assert!(list.is_empty());
        assert!(!list.remove(&f).unwrap());
    }

    #[test]
    fn fire_isolates_failures() {
        let heap = Heap::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let first = heap
            .alloc_function(move |args| {
                s.lock().push(("first", args.to_vec()));
                Err(Thrown::new("first failed"))
            })
            .unwrap();
        let s = Arc::clone(&seen);
        let second = heap
            .alloc_function(move |args| {
                s.lock().push(("second", args.to_vec()));
                Ok(Value::Undefined)
            })
            .unwrap();

        let uncaught = RecordingUncaught::default();
        let outcome = fire(&[first, second], &Value::from(7), &uncaught);

        assert_eq!(outcome, FireOutcome { invoked: 2, failed: 1 });
        assert_eq!(uncaught.errors(), vec![Thrown::new("first failed")]);
        let seen = seen.lock();
        assert_eq!(seen[0], ("first", vec![Value::from(7)]));
        assert_eq!(seen[1], ("second", vec![Value::from(7)]));
    }
}
