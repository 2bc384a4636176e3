//! Simulated collector and object table.
//!
//! The heap owns one strong reference to every object it allocated. At
//! collection time it works out which objects are still referenced from
//! outside the heap (trial deletion: strong count minus the heap's own
//! reference minus references from other heap objects), marks everything
//! reachable from those roots, and reports unreachable registered objects
//! to their handlers before sweeping them.
//!
//! Companions are kept alive through an ephemeron table keyed by their
//! target: a companion is marked iff its target is marked, and the target
//! never becomes reachable through its companion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::value::{NativeFn, ObjectId, ObjectKind, ObjectRef, PropertyKey, Value};
use super::{Tag, UnreachableHandler, WeakNotifier};
use crate::error::{Thrown, WeakError, WeakResult};

/// Heap configuration
///
/// # Examples
///
/// ```
/// use weakref::HeapConfig;
///
/// // A host that only supports finalizers on its own companion objects
/// let config = HeapConfig::default().with_direct_notifications(false);
/// assert!(!config.direct_notifications);
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Whether weak notifications may be attached to arbitrary objects.
    ///
    /// When false only companion objects accept registrations.
    ///
    /// Default: true
    pub direct_notifications: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            direct_notifications: true,
        }
    }
}

impl HeapConfig {
    pub fn with_direct_notifications(mut self, enabled: bool) -> Self {
        self.direct_notifications = enabled;
        self
    }
}

/// Outcome of one [`Heap::collect`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Objects swept
    pub collected: usize,
    /// Weak notifications delivered
    pub notified: usize,
}

/// Heap statistics
#[derive(Debug, Clone, Default)]
pub struct HeapStats {
    pub live_objects: usize,
    pub registrations: usize,
    pub collections: usize,
    pub reclaimed: usize,
}

struct Registration {
    seq: u64,
    object: ObjectId,
    companion: bool,
    tag: Tag,
    handler: Arc<dyn UnreachableHandler>,
}

/// Resets the collecting flag even if a handler panics
struct CollectingGuard<'a>(&'a AtomicBool);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// Process-wide so ids from different heaps never collide
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// In-process host heap with a stop-the-world collector
pub struct Heap {
    config: HeapConfig,
    next_seq: AtomicU64,
    objects: Mutex<BTreeMap<ObjectId, ObjectRef>>,
    /// target -> companions kept alive by it
    ephemerons: DashMap<ObjectId, Vec<ObjectRef>>,
    registrations: Mutex<Vec<Registration>>,
    collecting: AtomicBool,
    collections: AtomicUsize,
    reclaimed: AtomicUsize,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            config,
            next_seq: AtomicU64::new(0),
            objects: Mutex::new(BTreeMap::new()),
            ephemerons: DashMap::new(),
            registrations: Mutex::new(Vec::new()),
            collecting: AtomicBool::new(false),
            collections: AtomicUsize::new(0),
            reclaimed: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Whether the collector is currently running
    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    fn alloc(&self, kind: ObjectKind) -> WeakResult<ObjectRef> {
        if self.is_collecting() {
            return Err(WeakError::CollectionInProgress);
        }
        let id = ObjectId::from_raw(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        let object = ObjectRef::new(id, kind);
        self.objects.lock().insert(id, object.clone());
        Ok(object)
    }

    pub fn alloc_object(&self) -> WeakResult<ObjectRef> {
        self.alloc(ObjectKind::Plain)
    }

    /// Allocate a plain object with the given properties, in order.
    pub fn alloc_object_with<K, I>(&self, properties: I) -> WeakResult<ObjectRef>
    where
        K: Into<PropertyKey>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let object = self.alloc(ObjectKind::Plain)?;
        for (key, value) in properties {
            object.set(key.into(), value);
        }
        Ok(object)
    }

    pub fn alloc_array<I>(&self, elements: I) -> WeakResult<ObjectRef>
    where
        I: IntoIterator<Item = Value>,
    {
        let array = self.alloc(ObjectKind::Array)?;
        for element in elements {
            array.push(element);
        }
        Ok(array)
    }

    pub fn alloc_function<F>(&self, body: F) -> WeakResult<ObjectRef>
    where
        F: Fn(&[Value]) -> Result<Value, Thrown> + Send + Sync + 'static,
    {
        let body: NativeFn = Arc::new(body);
        self.alloc(ObjectKind::Function(body))
    }

    /// Whether `id` is still owned by the heap
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.lock().contains_key(&id)
    }

    pub fn live_objects(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.live_objects(),
            registrations: self.registrations.lock().len(),
            collections: self.collections.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }

    /// Whether `to` is reachable from `from` through properties and
    /// ephemerons.
    pub fn reaches(&self, from: &ObjectRef, to: &ObjectRef) -> bool {
        let objects = self.objects.lock();
        let mut seen = HashSet::new();
        let mut stack = vec![from.id()];
        while let Some(id) = stack.pop() {
            if id == to.id() {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(object) = objects.get(&id) {
                stack.extend(object.child_ids());
            }
            if let Some(companions) = self.ephemerons.get(&id) {
                stack.extend(companions.iter().map(ObjectRef::id));
            }
        }
        false
    }

    /// Run a full collection.
    ///
    /// Weak notifications for unreachable objects are delivered inside the
    /// collector context, direct targets first and companions after, each
    /// group in registration order. Allocation and nested collections fail
    /// with [`WeakError::CollectionInProgress`] until this returns.
    pub fn collect(&self) -> WeakResult<CollectionReport> {
        if self.collecting.swap(true, Ordering::AcqRel) {
            return Err(WeakError::CollectionInProgress);
        }
        let _guard = CollectingGuard(&self.collecting);

        let unreachable = self.find_unreachable();

        let mut due: Vec<Registration> = {
            let mut registrations = self.registrations.lock();
            let (due, keep): (Vec<_>, Vec<_>) = registrations
                .drain(..)
                .partition(|registration| unreachable.contains(&registration.object));
            *registrations = keep;
            due
        };
        due.sort_by_key(|registration| (registration.companion, registration.seq));

        let notified = due.len();
        for registration in due {
            tracing::trace!(
                object = %registration.object,
                tag = %registration.tag,
                "object unreachable, notifying"
            );
            registration.handler.on_unreachable(registration.tag);
        }

        let swept: Vec<ObjectRef> = {
            let mut objects = self.objects.lock();
            unreachable
                .iter()
                .filter_map(|id| objects.remove(id))
                .collect()
        };
        for id in &unreachable {
            self.ephemerons.remove(id);
        }
        // Break cycles among the dead
        for object in &swept {
            object.clear_properties();
        }
        let collected = swept.len();
        drop(swept);

        self.collections.fetch_add(1, Ordering::Relaxed);
        self.reclaimed.fetch_add(collected, Ordering::Relaxed);
        tracing::debug!(collected, notified, "collection finished");

        Ok(CollectionReport {
            collected,
            notified,
        })
    }

    fn find_unreachable(&self) -> HashSet<ObjectId> {
        let objects = self.objects.lock();

        let mut edges: HashMap<ObjectId, Vec<ObjectId>> = HashMap::with_capacity(objects.len());
        let mut internal: HashMap<ObjectId, usize> = HashMap::new();
        for (id, object) in objects.iter() {
            let children = object.child_ids();
            for child in &children {
                *internal.entry(*child).or_default() += 1;
            }
            edges.insert(*id, children);
        }
        let companions: HashMap<ObjectId, Vec<ObjectId>> = self
            .ephemerons
            .iter()
            .map(|entry| {
                let ids: Vec<ObjectId> = entry.value().iter().map(ObjectRef::id).collect();
                (*entry.key(), ids)
            })
            .collect();
        for ids in companions.values() {
            for id in ids {
                *internal.entry(*id).or_default() += 1;
            }
        }

        let mut stack: Vec<ObjectId> = objects
            .iter()
            .filter(|(id, object)| {
                let inside = 1 + internal.get(*id).copied().unwrap_or(0);
                object.strong_count() > inside
            })
            .map(|(id, _)| *id)
            .collect();

        let mut marked = HashSet::with_capacity(objects.len());
        while let Some(id) = stack.pop() {
            if !marked.insert(id) {
                continue;
            }
            if let Some(children) = edges.get(&id) {
                stack.extend(children.iter().copied());
            }
            if let Some(ids) = companions.get(&id) {
                stack.extend(ids.iter().copied());
            }
        }

        objects
            .keys()
            .filter(|id| !marked.contains(*id))
            .copied()
            .collect()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakNotifier for Heap {
    fn register_weak(
        &self,
        object: &ObjectRef,
        tag: Tag,
        handler: Arc<dyn UnreachableHandler>,
    ) -> WeakResult<()> {
        if !self.config.direct_notifications && !object.is_companion() {
            return Err(WeakError::Unsupported(object.id()));
        }
        if !self.contains(object.id()) {
            return Err(WeakError::State(format!(
                "object {} does not belong to this heap",
                object.id()
            )));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.registrations.lock().push(Registration {
            seq,
            object: object.id(),
            companion: object.is_companion(),
            tag,
            handler,
        });
        Ok(())
    }

    fn attach_companion(&self, target: &ObjectRef) -> WeakResult<ObjectRef> {
        if !self.contains(target.id()) {
            return Err(WeakError::State(format!(
                "object {} does not belong to this heap",
                target.id()
            )));
        }
        let companion = self.alloc(ObjectKind::Companion)?;
        if self.reaches(&companion, target) {
            return Err(WeakError::State(format!(
                "companion {} would keep target {} alive",
                companion.id(),
                target.id()
            )));
        }
        self.ephemerons
            .entry(target.id())
            .or_default()
            .push(companion.clone());
        Ok(companion)
    }
}
