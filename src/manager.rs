//! Public entry point tying the tracker, callback registry and scheduler
//! together.

use std::sync::Arc;

use crate::callbacks::CallbackList;
use crate::config::WeakConfig;
use crate::error::{WeakError, WeakResult};
use crate::host::value::{ObjectId, ObjectRef, Value};
use crate::host::{Deferrer, EventLoop, Heap, UncaughtHandler, WeakNotifier};
use crate::proxy::WeakProxy;
use crate::scheduler::{FinalizationScheduler, SchedulerStats};
use crate::tracker::{HandleState, LivenessTracker, ManagerId, WeakRef};

/// Weak reference coordinator
///
/// Creates weak observations of host objects, answers liveness queries and
/// delivers reclamation callbacks at the host's next safe point. Every
/// handle-taking operation also accepts a [`WeakProxy`].
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
/// let handle = weak.create(&target.clone().into(), None).unwrap();
/// assert_eq!(weak.get(&handle).unwrap(), Some(target.clone()));
///
/// drop(target);
/// heap.collect().unwrap();
/// event_loop.run_until_idle().unwrap();
/// assert!(weak.is_dead(&handle));
/// assert_eq!(weak.get(&handle).unwrap(), None);
/// ```
pub struct WeakManager {
    id: ManagerId,
    config: WeakConfig,
    tracker: LivenessTracker,
    scheduler: Arc<FinalizationScheduler>,
}

impl WeakManager {
    pub fn new(
        notifier: Arc<dyn WeakNotifier>,
        deferrer: Arc<dyn Deferrer>,
        uncaught: Arc<dyn UncaughtHandler>,
        config: WeakConfig,
    ) -> Self {
        let id = ManagerId::next();
        let scheduler = Arc::new(FinalizationScheduler::new(deferrer, uncaught));
        let tracker = LivenessTracker::new(id, config.strategy, notifier, Arc::clone(&scheduler));
        tracing::debug!(name = %config.name, strategy = ?config.strategy, "weak manager created");
        Self {
            id,
            config,
            tracker,
            scheduler,
        }
    }

    /// Manager wired to the in-process heap and event loop
    pub fn with_event_loop(heap: Arc<Heap>, event_loop: Arc<EventLoop>, config: WeakConfig) -> Self {
        Self::new(heap, event_loop.clone(), event_loop, config)
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    pub fn config(&self) -> &WeakConfig {
        &self.config
    }

    /// Start observing `target`, optionally with a first callback.
    ///
    /// Fails with a type error when `target` is not object-like or
    /// `callback` is not callable. Nothing is registered on failure.
    pub fn create(&self, target: &Value, callback: Option<&Value>) -> WeakResult<WeakRef> {
        if let Some(callback) = callback {
            if callback.as_callable().is_none() {
                return Err(WeakError::Type(format!(
                    "callback should be function, got {}",
                    callback.type_name()
                )));
            }
        }
        let handle = self.tracker.create(target)?;
        if let Some(callback) = callback {
            handle.record().callbacks().push(callback)?;
        }
        Ok(handle)
    }

    /// Like [`create`](Self::create), wrapping the handle in a proxy.
    pub fn create_proxy(&self, target: &Value, callback: Option<&Value>) -> WeakResult<WeakProxy> {
        self.create(target, callback).map(WeakProxy::new)
    }

    /// The target, or `None` once reclaimed.
    ///
    /// Fails with a state error for handles from another manager.
    pub fn get<H: AsRef<WeakRef>>(&self, handle: &H) -> WeakResult<Option<ObjectRef>> {
        self.tracker.get(handle.as_ref())
    }

    pub fn is_dead<H: AsRef<WeakRef>>(&self, handle: &H) -> bool {
        self.tracker.is_dead(handle.as_ref())
    }

    /// Best-effort diagnostic; see [`WeakRef::is_near_death`].
    pub fn is_near_death<H: AsRef<WeakRef>>(&self, handle: &H) -> bool {
        self.tracker.is_near_death(handle.as_ref())
    }

    /// Whether `handle` was produced by this manager
    pub fn is_weak_ref<H: AsRef<WeakRef>>(&self, handle: &H) -> bool {
        self.tracker.owns(handle.as_ref())
    }

    pub fn state<H: AsRef<WeakRef>>(&self, handle: &H) -> HandleState {
        handle.as_ref().state()
    }

    pub fn target_id<H: AsRef<WeakRef>>(&self, handle: &H) -> ObjectId {
        handle.as_ref().target_id()
    }

    /// Append a callback. It fires once per registration, after any
    /// callbacks added before it; added after finalization it never fires.
    pub fn add_callback<H: AsRef<WeakRef>>(&self, handle: &H, callback: &Value) -> WeakResult<()> {
        let handle = self.owned(handle.as_ref())?;
        handle.record().callbacks().push(callback)
    }

    /// Remove every registration of `callback`; returns whether any existed.
    pub fn remove_callback<H: AsRef<WeakRef>>(
        &self,
        handle: &H,
        callback: &Value,
    ) -> WeakResult<bool> {
        let handle = self.owned(handle.as_ref())?;
        handle.record().callbacks().remove(callback)
    }

    pub fn remove_callbacks<H: AsRef<WeakRef>>(&self, handle: &H) -> WeakResult<()> {
        let handle = self.owned(handle.as_ref())?;
        handle.record().callbacks().clear();
        Ok(())
    }

    /// Live view of the handle's callbacks
    pub fn callbacks<H: AsRef<WeakRef>>(&self, handle: &H) -> CallbackList {
        handle.as_ref().record().callbacks().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    fn owned<'h>(&self, handle: &'h WeakRef) -> WeakResult<&'h WeakRef> {
        if self.tracker.owns(handle) {
            Ok(handle)
        } else {
            Err(WeakError::State(format!(
                "{} was not created by this manager",
                handle.tag()
            )))
        }
    }
}

impl std::fmt::Debug for WeakManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakManager")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
