//! Liveness tracking for weakly observed host objects.
//!
//! A [`WeakRef`] shares one [`Record`] with the finalization scheduler. The
//! record holds a non-owning link to the target which is cleared exactly
//! once, when the collector reports the target unreachable, and never set
//! again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callbacks::CallbackList;
use crate::config::Strategy;
use crate::error::{WeakError, WeakResult};
use crate::host::value::{ObjectId, ObjectRef, Value, WeakObject};
use crate::host::{Tag, UnreachableHandler, WeakNotifier};
use crate::scheduler::FinalizationScheduler;

/// Identity of the [`WeakManager`](crate::WeakManager) that produced a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(u64);

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

impl ManagerId {
    pub(crate) fn next() -> Self {
        ManagerId(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of one weak observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// Target set, nothing pending
    Alive,
    /// The collector reported the target unreachable; target cleared
    NearDeath,
    /// Callback drain queued for the next safe point
    Deferred,
    /// Callbacks drained; terminal
    Finalized,
}

struct RecordState {
    state: HandleState,
    target: Option<WeakObject>,
}

/// Shared bookkeeping behind a [`WeakRef`]
pub(crate) struct Record {
    owner: ManagerId,
    tag: Tag,
    target_id: ObjectId,
    strategy: Strategy,
    state: Mutex<RecordState>,
    callbacks: CallbackList,
}

impl Record {
    fn new(owner: ManagerId, tag: Tag, target: &ObjectRef, strategy: Strategy) -> Self {
        Self {
            owner,
            tag,
            target_id: target.id(),
            strategy,
            state: Mutex::new(RecordState {
                state: HandleState::Alive,
                target: Some(target.downgrade()),
            }),
            callbacks: CallbackList::new(),
        }
    }

    pub(crate) fn tag(&self) -> Tag {
        self.tag
    }

    pub(crate) fn target_id(&self) -> ObjectId {
        self.target_id
    }

    pub(crate) fn callbacks(&self) -> &CallbackList {
        &self.callbacks
    }

    pub(crate) fn state(&self) -> HandleState {
        self.state.lock().state
    }

    pub(crate) fn target(&self) -> Option<WeakObject> {
        self.state.lock().target.clone()
    }

    /// Clear the target and enter `NearDeath`. Only the first call does
    /// anything.
    pub(crate) fn mark_near_death(&self) -> bool {
        let mut record = self.state.lock();
        if record.state != HandleState::Alive {
            return false;
        }
        record.state = HandleState::NearDeath;
        record.target = None;
        true
    }

    pub(crate) fn mark_deferred(&self) {
        self.advance(HandleState::NearDeath, HandleState::Deferred);
    }

    pub(crate) fn mark_finalized(&self) {
        self.advance(HandleState::Deferred, HandleState::Finalized);
    }

    fn advance(&self, from: HandleState, to: HandleState) {
        let mut record = self.state.lock();
        if record.state == from {
            record.state = to;
        } else {
            tracing::warn!(
                tag = %self.tag,
                state = ?record.state,
                expected = ?from,
                "skipping out-of-order handle transition"
            );
        }
    }
}

/// A weak observation of one host object.
///
/// Cloning shares the observation. Dropping every clone does not cancel
/// the reclamation callbacks.
#[derive(Clone)]
pub struct WeakRef {
    record: Arc<Record>,
}

impl WeakRef {
    pub(crate) fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn tag(&self) -> Tag {
        self.record.tag
    }

    /// Identity of the observed object, kept after it is reclaimed
    pub fn target_id(&self) -> ObjectId {
        self.record.target_id
    }

    pub fn state(&self) -> HandleState {
        self.record.state()
    }

    /// Whether the observation goes through a companion object
    pub fn uses_companion(&self) -> bool {
        self.record.strategy == Strategy::Companion
    }

    /// Strong reference to the target while it is alive
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.record.target().and_then(|target| target.upgrade())
    }

    pub fn is_dead(&self) -> bool {
        self.upgrade().is_none()
    }

    pub fn is_near_death(&self) -> bool {
        matches!(
            self.state(),
            HandleState::NearDeath | HandleState::Deferred
        )
    }

    /// Whether two handles share the same observation
    pub fn ptr_eq(&self, other: &WeakRef) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

impl AsRef<WeakRef> for WeakRef {
    fn as_ref(&self) -> &WeakRef {
        self
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("tag", &self.record.tag)
            .field("target", &self.record.target_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Creates weak observations and answers liveness queries
pub struct LivenessTracker {
    owner: ManagerId,
    strategy: Strategy,
    notifier: Arc<dyn WeakNotifier>,
    scheduler: Arc<FinalizationScheduler>,
    next_tag: AtomicU64,
}

impl LivenessTracker {
    pub(crate) fn new(
        owner: ManagerId,
        strategy: Strategy,
        notifier: Arc<dyn WeakNotifier>,
        scheduler: Arc<FinalizationScheduler>,
    ) -> Self {
        Self {
            owner,
            strategy,
            notifier,
            scheduler,
            next_tag: AtomicU64::new(1),
        }
    }

    /// Start observing `target`.
    ///
    /// Fails with a type error when `target` is not object-like.
    pub fn create(&self, target: &Value) -> WeakResult<WeakRef> {
        let object = target.as_object().ok_or_else(|| {
            WeakError::Type(format!(
                "target should be object, got {}",
                target.type_name()
            ))
        })?;

        let tag = Tag::from_raw(self.next_tag.fetch_add(1, Ordering::Relaxed));
        let strategy = self.register(object, tag)?;
        let record = Arc::new(Record::new(self.owner, tag, object, strategy));
        self.scheduler.track(Arc::clone(&record));

        tracing::trace!(tag = %tag, target = %object.id(), ?strategy, "weak reference created");
        Ok(WeakRef { record })
    }

    /// Register with the host, returning the strategy actually used.
    fn register(&self, object: &ObjectRef, tag: Tag) -> WeakResult<Strategy> {
        let handler: Arc<dyn UnreachableHandler> = self.scheduler.clone();
        match self.strategy {
            Strategy::Direct => self
                .notifier
                .register_weak(object, tag, handler)
                .map(|()| Strategy::Direct),
            Strategy::Companion => self.register_companion(object, tag, handler),
            Strategy::Auto => match self.notifier.register_weak(object, tag, Arc::clone(&handler)) {
                Ok(()) => Ok(Strategy::Direct),
                Err(WeakError::Unsupported(_)) => self.register_companion(object, tag, handler),
                Err(err) => Err(err),
            },
        }
    }

    fn register_companion(
        &self,
        object: &ObjectRef,
        tag: Tag,
        handler: Arc<dyn UnreachableHandler>,
    ) -> WeakResult<Strategy> {
        let companion = self.notifier.attach_companion(object)?;
        self.notifier.register_weak(&companion, tag, handler)?;
        // `companion` drops here; only the target keeps it alive
        Ok(Strategy::Companion)
    }

    /// Whether `handle` was produced by this tracker's manager
    pub fn owns(&self, handle: &WeakRef) -> bool {
        handle.record.owner == self.owner
    }

    /// The target, or `None` once it has been reclaimed.
    ///
    /// Fails with a state error for handles produced elsewhere.
    pub fn get(&self, handle: &WeakRef) -> WeakResult<Option<ObjectRef>> {
        if !self.owns(handle) {
            return Err(WeakError::State(format!(
                "{} was not created by this manager",
                handle.tag()
            )));
        }
        Ok(handle.upgrade())
    }

    pub fn is_dead(&self, handle: &WeakRef) -> bool {
        handle.is_dead()
    }

    /// Diagnostic only: true between the collector's signal and the end of
    /// the callback drain.
    pub fn is_near_death(&self, handle: &WeakRef) -> bool {
        handle.is_near_death()
    }
}

impl fmt::Debug for LivenessTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessTracker")
            .field("owner", &self.owner)
            .field("strategy", &self.strategy)
            .finish()
    }
}
