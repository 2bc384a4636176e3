//! Property-based tests for weak reference invariants
//!
//! Random populations of targets are created, a random subset is released,
//! and the collector plus one event loop drain must leave exactly the
//! released handles dead with each of their callbacks run once, in order.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use weakref::{EventLoop, HandleState, Heap, PropertyKey, Value, WeakConfig, WeakManager};

fn setup() -> (Arc<Heap>, Arc<EventLoop>, WeakManager) {
    let heap = Arc::new(Heap::new());
    let event_loop = Arc::new(EventLoop::new());
    let weak = WeakManager::with_event_loop(
        Arc::clone(&heap),
        Arc::clone(&event_loop),
        WeakConfig::default(),
    );
    (heap, event_loop, weak)
}

/// Property keys that exercise both index and named slots
fn arb_key() -> impl Strategy<Value = PropertyKey> {
    prop_oneof![
        (0u32..64).prop_map(PropertyKey::Index),
        "[a-z]{1,6}".prop_map(PropertyKey::from),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1_000i32..1_000).prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn released_targets_die_and_fire_exactly_once(
        population in prop::collection::vec((any::<bool>(), 0usize..4), 1..24)
    ) {
        let (heap, event_loop, weak) = setup();
        let fired: Arc<Mutex<Vec<(usize, usize, Value)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut kept = Vec::new();
        let mut handles = Vec::new();
        for (index, (keep, callbacks)) in population.iter().enumerate() {
            let target = heap.alloc_object().unwrap();
            let handle = weak.create(&target.clone().into(), None).unwrap();
            for slot in 0..*callbacks {
                let log = Arc::clone(&fired);
                let callback = heap
                    .alloc_function(move |args| {
                        log.lock().push((index, slot, args[0].clone()));
                        Ok(Value::Undefined)
                    })
                    .unwrap();
                weak.add_callback(&handle, &callback.into()).unwrap();
            }
            if *keep {
                kept.push(target);
            }
            handles.push(handle);
        }

        heap.collect().unwrap();
        event_loop.run_until_idle().unwrap();

        let fired = fired.lock().clone();
        let mut expected = Vec::new();
        for (index, (keep, callbacks)) in population.iter().enumerate() {
            let handle = &handles[index];
            if *keep {
                prop_assert!(!weak.is_dead(handle));
                prop_assert_eq!(weak.state(handle), HandleState::Alive);
                prop_assert!(weak.get(handle).unwrap().is_some());
            } else {
                prop_assert!(weak.is_dead(handle));
                prop_assert_eq!(weak.state(handle), HandleState::Finalized);
                prop_assert!(weak.get(handle).unwrap().is_none());
                for slot in 0..*callbacks {
                    expected.push((index, slot, Value::from(handle.target_id())));
                }
            }
        }
        prop_assert_eq!(fired, expected);

        // Drained callbacks are garbage now; kept handles still root theirs
        heap.collect().unwrap();
        prop_assert_eq!(heap.live_objects(), kept.len() + count_live_callbacks(&population));
    }

    #[test]
    fn proxy_mirrors_then_empties(
        properties in prop::collection::vec((arb_key(), arb_value()), 0..16),
        writes in prop::collection::vec((arb_key(), arb_value()), 0..8),
    ) {
        let (heap, event_loop, weak) = setup();
        let target = heap.alloc_object_with(properties).unwrap();
        let proxy = weak.create_proxy(&target.clone().into(), None).unwrap();

        prop_assert_eq!(proxy.own_keys(), target.own_keys());
        for key in target.own_keys() {
            prop_assert_eq!(proxy.get(key.clone()), target.get(&key));
        }

        drop(target);
        heap.collect().unwrap();
        event_loop.run_until_idle().unwrap();

        for (key, value) in writes {
            prop_assert_eq!(proxy.set(key.clone(), value.clone()), value);
            prop_assert_eq!(proxy.get(key.clone()), None);
            prop_assert!(!proxy.has(key.clone()));
            prop_assert!(!proxy.delete(key));
        }
        prop_assert!(proxy.own_keys().is_empty());
    }

    #[test]
    fn queries_never_change_state(reads in 1usize..2_000) {
        let (heap, event_loop, weak) = setup();
        let target = heap.alloc_object().unwrap();
        let handle = weak.create(&target.clone().into(), None).unwrap();

        for _ in 0..reads {
            prop_assert!(!weak.is_dead(&handle));
            prop_assert!(!weak.is_near_death(&handle));
            prop_assert!(weak.get(&handle).unwrap().is_some());
        }
        prop_assert!(event_loop.is_idle());
        prop_assert_eq!(weak.state(&handle), HandleState::Alive);
        prop_assert_eq!(weak.stats().pending, 1);
    }
}

/// Callback functions stay reachable from live handles' callback lists
fn count_live_callbacks(population: &[(bool, usize)]) -> usize {
    population
        .iter()
        .filter(|(keep, _)| *keep)
        .map(|(_, callbacks)| callbacks)
        .sum()
}
