//! Weak references with deferred reclamation callbacks.
//!
//! A [`WeakManager`] observes host objects without keeping them alive. When
//! the host collector finds an observed object unreachable, the handle is
//! flipped to dead inside the collector and its callbacks are queued for the
//! host's next safe point, where they run once each, in registration order.
//! A [`WeakProxy`] stands in for the object while it is alive and reads as an
//! empty object afterwards.
//!
//! The host is reached only through the traits in [`host`]; [`Heap`] and
//! [`EventLoop`] are in-process implementations of them.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use weakref::{EventLoop, Heap, Value, WeakConfig, WeakManager};
//!
//! let heap = Arc::new(Heap::new());
//! let event_loop = Arc::new(EventLoop::new());
//! let weak = WeakManager::with_event_loop(heap.clone(), event_loop.clone(), WeakConfig::default());
//!
//! let fired = Arc::new(Mutex::new(Vec::new()));
//! let log = fired.clone();
//! let callback = heap
//!     .alloc_function(move |args| {
//!         log.lock().extend(args.iter().cloned());
//!         Ok(Value::Undefined)
//!     })
//!     .unwrap();
//!
//! let target = heap.alloc_object().unwrap();
//! let id = target.id();
//! let handle = weak.create(&target.into(), Some(&callback.into())).unwrap();
//!
//! heap.collect().unwrap();
//! assert!(weak.is_dead(&handle));
//! assert!(fired.lock().is_empty());
//!
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(*fired.lock(), vec![Value::from(id)]);
//! ```

pub mod callbacks;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod proxy;
pub mod scheduler;
pub mod tracker;

pub use callbacks::CallbackList;
pub use config::{Strategy, WeakConfig};
pub use error::{ErrorKind, Thrown, WeakError, WeakResult};
pub use host::{
    CollectionReport, EventLoop, EventLoopConfig, Heap, HeapConfig, HeapStats, ObjectId,
    ObjectKind, PropertyKey, Symbol, Tag, UncaughtPolicy, Value, WeakObject,
};
pub use host::value::ObjectRef;
pub use manager::WeakManager;
pub use proxy::{DeadView, LiveView, ObjectView, ProxyView, WeakProxy};
pub use scheduler::{FinalizationScheduler, SchedulerStats};
pub use tracker::{HandleState, LivenessTracker, ManagerId, WeakRef};
