//! Forwarding stand-in for a weakly observed object.
//!
//! While the target is alive every property operation on a [`WeakProxy`] is
//! forwarded to it. Once the target has been reclaimed the proxy answers as
//! an empty object that silently ignores writes. Neither variant ever fails
//! or changes the liveness of the handle.

use crate::host::value::{PropertyKey, Value};
use crate::tracker::WeakRef;

/// The dynamic property surface shared by live and dead proxies
pub trait ObjectView {
    /// Read a property; `None` when absent.
    fn get(&self, key: &PropertyKey) -> Option<Value>;

    /// Write a property and return the assigned value, whether or not the
    /// write had any effect.
    fn set(&self, key: PropertyKey, value: Value) -> Value;

    /// Remove a property; returns whether one was removed.
    fn delete(&self, key: &PropertyKey) -> bool;

    fn has(&self, key: &PropertyKey) -> bool;

    /// Own enumerable keys, in the target's enumeration order.
    fn own_keys(&self) -> Vec<PropertyKey>;
}

/// Forwards to the target through the handle.
///
/// The target is upgraded per operation and released right after, so a view
/// kept around never extends the target's lifetime. If the target dies
/// between [`WeakProxy::view`] and an operation, the operation answers as
/// [`DeadView`] would.
#[derive(Debug, Clone, Copy)]
pub struct LiveView<'a> {
    handle: &'a WeakRef,
}

impl ObjectView for LiveView<'_> {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.handle.upgrade().and_then(|target| target.get(key))
    }

    fn set(&self, key: PropertyKey, value: Value) -> Value {
        if let Some(target) = self.handle.upgrade() {
            target.set(key, value.clone());
        }
        value
    }

    fn delete(&self, key: &PropertyKey) -> bool {
        self.handle
            .upgrade()
            .map_or(false, |target| target.delete(key))
    }

    fn has(&self, key: &PropertyKey) -> bool {
        self.handle
            .upgrade()
            .map_or(false, |target| target.has(key))
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        self.handle
            .upgrade()
            .map(|target| target.own_keys())
            .unwrap_or_default()
    }
}

/// Answers every operation as an empty, frozen-looking object
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadView;

impl ObjectView for DeadView {
    fn get(&self, _key: &PropertyKey) -> Option<Value> {
        None
    }

    fn set(&self, _key: PropertyKey, value: Value) -> Value {
        value
    }

    fn delete(&self, _key: &PropertyKey) -> bool {
        false
    }

    fn has(&self, _key: &PropertyKey) -> bool {
        false
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        Vec::new()
    }
}

/// View selected from the handle's state at the time of the call
#[derive(Debug, Clone, Copy)]
pub enum ProxyView<'a> {
    Live(LiveView<'a>),
    Dead(DeadView),
}

impl ProxyView<'_> {
    pub fn is_live(&self) -> bool {
        matches!(self, ProxyView::Live(_))
    }

    fn as_dyn(&self) -> &dyn ObjectView {
        match self {
            ProxyView::Live(view) => view,
            ProxyView::Dead(view) => view,
        }
    }
}

impl ObjectView for ProxyView<'_> {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.as_dyn().get(key)
    }

    fn set(&self, key: PropertyKey, value: Value) -> Value {
        self.as_dyn().set(key, value)
    }

    fn delete(&self, key: &PropertyKey) -> bool {
        self.as_dyn().delete(key)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        self.as_dyn().has(key)
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        self.as_dyn().own_keys()
    }
}

/// A weak reference presented as the object it observes.
///
/// Created by [`WeakManager::create_proxy`](crate::WeakManager::create_proxy).
/// The proxy is accepted wherever a handle is expected.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weakref::{EventLoop, Heap, Value, WeakConfig, WeakManager};
///
/// let heap = Arc::new(Heap::new());
/// let event_loop = Arc::new(EventLoop::new());
/// let weak = WeakManager::with_event_loop(heap.clone(), event_loop.clone(), WeakConfig::default());
///
/// let target = heap.alloc_object_with([("x", Value::from(1))]).unwrap();
/// let proxy = weak.create_proxy(&target.clone().into(), None).unwrap();
/// assert_eq!(proxy.get("x"), Some(Value::from(1)));
///
/// drop(target);
/// heap.collect().unwrap();
/// event_loop.run_until_idle().unwrap();
///
/// assert_eq!(proxy.get("x"), None);
/// assert_eq!(proxy.set("y", Value::from(2)), Value::from(2));
/// assert!(proxy.own_keys().is_empty());
/// ```
#[derive(Debug)]
pub struct WeakProxy {
    handle: WeakRef,
}

impl WeakProxy {
    pub(crate) fn new(handle: WeakRef) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &WeakRef {
        &self.handle
    }

    pub fn into_handle(self) -> WeakRef {
        self.handle
    }

    pub fn view(&self) -> ProxyView<'_> {
        if self.handle.is_dead() {
            ProxyView::Dead(DeadView)
        } else {
            ProxyView::Live(LiveView {
                handle: &self.handle,
            })
        }
    }

    pub fn get(&self, key: impl Into<PropertyKey>) -> Option<Value> {
        self.view().get(&key.into())
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Value {
        self.view().set(key.into(), value.into())
    }

    pub fn delete(&self, key: impl Into<PropertyKey>) -> bool {
        self.view().delete(&key.into())
    }

    pub fn has(&self, key: impl Into<PropertyKey>) -> bool {
        self.view().has(&key.into())
    }

    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.view().own_keys()
    }
}

impl AsRef<WeakRef> for WeakProxy {
    fn as_ref(&self) -> &WeakRef {
        &self.handle
    }
}
