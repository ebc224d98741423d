//! Integration tests for the propagation kernel.
//!
//! These exercise the full path: typed event handles, combinator-built
//! links, and the sweep scheduler working together.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use smallvec::smallvec;

use conflux_core::error::{Fault, StageError};
use conflux_core::graph::{create_link, launch, LinkConfig, LinkKind, Node, NodeKind, NodeMeta};
use conflux_core::payload::payload;
use conflux_core::registry::IdRegistry;
use conflux_core::scope::Scope;
use conflux_core::stage::Stage;
use conflux_core::{Event, Observer};

/// A mapped-then-filtered chain delivers exactly the declared composition:
/// trigger 1 maps to 2, fails the `> 2` filter, and is dropped; trigger 2
/// maps to 4 and is observed once.
#[test]
fn map_filter_watch_chain() {
    let source = Event::<i32>::new("source");
    let mapped = source.map(|n| n * 2);
    let filtered = mapped.filter(|n| *n > 2);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = filtered.watch(move |n| sink.lock().unwrap().push(n));

    source.trigger(1).unwrap();
    assert!(seen.lock().unwrap().is_empty());

    source.trigger(2).unwrap();
    assert_eq!(*seen.lock().unwrap(), [4]);
}

/// Pure derivation steps compose left-to-right in registration order.
#[test]
fn derivations_compose_left_to_right() {
    let source = Event::<i32>::new("source");
    let composed = source.map(|n| n + 1).map(|n| n * 10);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = composed.watch(move |n| sink.lock().unwrap().push(n));

    source.trigger(3).unwrap();
    assert_eq!(*seen.lock().unwrap(), [40]);
}

/// Nothing downstream of a rejecting filter observes the value or
/// anything derived from it.
#[test]
fn filter_rejection_blocks_the_whole_branch() {
    let source = Event::<i32>::new("source");
    let odd = source.filter(|n| n % 2 == 1);
    let derived = odd.map(|n| n * 100);

    let odd_count = Arc::new(AtomicI32::new(0));
    let derived_count = Arc::new(AtomicI32::new(0));
    let odd_sink = odd_count.clone();
    let derived_sink = derived_count.clone();
    let _a = odd.watch(move |_| {
        odd_sink.fetch_add(1, Ordering::SeqCst);
    });
    let _b = derived.watch(move |_| {
        derived_sink.fetch_add(1, Ordering::SeqCst);
    });

    source.trigger(2).unwrap();
    assert_eq!(odd_count.load(Ordering::SeqCst), 0);
    assert_eq!(derived_count.load(Ordering::SeqCst), 0);

    source.trigger(3).unwrap();
    assert_eq!(odd_count.load(Ordering::SeqCst), 1);
    assert_eq!(derived_count.load(Ordering::SeqCst), 1);
}

/// Triggering an adapter is equivalent to triggering its target with the
/// adapted value.
#[test]
fn prepend_adapts_the_input() {
    let target = Event::<String>::new("target");
    let adapter = target.prepend(|s: String| s.to_uppercase());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = target.watch(move |s| sink.lock().unwrap().push(s));

    adapter.trigger("a".to_string()).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["A"]);
}

/// A failing watcher delivers exactly one fault to the subscription's
/// dedicated failure event, and the trigger that caused it returns
/// normally.
#[test]
fn failing_watcher_routes_to_its_fault_event() {
    let source = Event::<i32>::new("source");
    let sub = source.try_watch(|_| Err(StageError::new("boom")));

    let faults = Arc::new(Mutex::new(Vec::new()));
    let sink = faults.clone();
    let _fault_sub = sub
        .fault()
        .watch(move |fault| sink.lock().unwrap().push(fault.error.message().to_string()));

    source.trigger(1).unwrap();
    assert_eq!(*faults.lock().unwrap(), ["boom"]);
}

/// A failing compute stage with a declared fail target yields exactly one
/// fault delivery and zero deliveries to the stage's normal children.
#[test]
fn failing_compute_with_fail_target_skips_children() {
    let registry = IdRegistry::new();
    let fail_target = Event::<Fault>::new("faults");
    let child = Event::<i32>::new("child");

    let faults = Arc::new(AtomicI32::new(0));
    let deliveries = Arc::new(AtomicI32::new(0));
    let fault_sink = faults.clone();
    let child_sink = deliveries.clone();
    let _a = fail_target.watch(move |_| {
        fault_sink.fetch_add(1, Ordering::SeqCst);
    });
    let _b = child.watch(move |_| {
        child_sink.fetch_add(1, Ordering::SeqCst);
    });

    let source = Node::create_with_fail_route(
        NodeMeta {
            kind: NodeKind::Event,
            id: registry.next(),
            name: "raw source".to_string(),
            binding: None,
            extra: None,
        },
        smallvec![Stage::emit("raw source")],
        fail_target.node(),
    );
    create_link(
        std::slice::from_ref(&source),
        LinkConfig {
            children: vec![child.node().clone()],
            scope: Scope::empty(),
            stages: smallvec![Stage::compute(|_value, _scope, _ctx| {
                Err(StageError::new("bad transform"))
            })],
            kind: LinkKind::Crosslink,
        },
    );

    launch(&source, payload(1_i32)).unwrap();
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
}

/// A failing map with no fail target escalates out of the trigger, and
/// the kernel stays clean for subsequent, independent triggers.
#[test]
fn unhandled_failure_escalates_without_corrupting_later_sweeps() {
    let source = Event::<i32>::new("source");
    let _bad = source.try_map::<i32, _>(|_| Err(StageError::new("boom")));

    let fault = source.trigger(1).unwrap_err();
    assert_eq!(fault.error.message(), "boom");

    let other = Event::<i32>::new("other");
    let seen = Arc::new(AtomicI32::new(0));
    let sink = seen.clone();
    let _sub = other.watch(move |n| {
        sink.store(n, Ordering::SeqCst);
    });
    other.trigger(5).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

/// A trigger issued inside a running watcher merges into the active sweep
/// and completes — descendants included — before the outer trigger call
/// returns.
#[test]
fn reentrant_trigger_completes_within_the_outer_sweep() {
    let outer = Event::<&'static str>::new("outer");
    let inner = Event::<&'static str>::new("inner");

    let log = Arc::new(Mutex::new(Vec::new()));
    let inner_log = log.clone();
    let _inner_sub = inner.watch(move |v| inner_log.lock().unwrap().push(format!("inner:{v}")));

    let outer_log = log.clone();
    let inner_clone = inner.clone();
    let _outer_sub = outer.watch(move |v| {
        outer_log.lock().unwrap().push(format!("outer:{v}"));
        inner_clone.trigger("nested").unwrap();
        outer_log.lock().unwrap().push("outer:done".to_string());
    });

    outer.trigger("go").unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["outer:go", "outer:done", "inner:nested"]
    );

    // An independently-issued trigger only starts after the merged sweep
    // has fully drained.
    outer.trigger("again").unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        [
            "outer:go",
            "outer:done",
            "inner:nested",
            "outer:again",
            "outer:done",
            "inner:nested"
        ]
    );
}

/// Sibling watchers fire in registration order on every trigger.
#[test]
fn sibling_links_fire_in_registration_order() {
    let source = Event::<i32>::new("source");
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = log.clone();
    let _a = source.watch(move |_| first.lock().unwrap().push("first"));
    let second = log.clone();
    let _b = source.watch(move |_| second.lock().unwrap().push("second"));

    source.trigger(1).unwrap();
    source.trigger(2).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["first", "second", "first", "second"]
    );
}

/// No occurrence triggered after disposal propagates through the disposed
/// edge; other edges are unaffected. Disposal is idempotent.
#[test]
fn disposed_subscription_stops_observing() {
    let source = Event::<i32>::new("source");
    let kept = Arc::new(AtomicI32::new(0));
    let dropped = Arc::new(AtomicI32::new(0));

    let dropped_sink = dropped.clone();
    let disposable = source.watch(move |_| {
        dropped_sink.fetch_add(1, Ordering::SeqCst);
    });
    let kept_sink = kept.clone();
    let _kept_sub = source.watch(move |_| {
        kept_sink.fetch_add(1, Ordering::SeqCst);
    });

    source.trigger(1).unwrap();
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(kept.load(Ordering::SeqCst), 1);

    disposable.dispose();
    disposable.dispose();

    source.trigger(2).unwrap();
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(kept.load(Ordering::SeqCst), 2);
}

/// Disposing after the watched event is gone is a no-op.
#[test]
fn dispose_survives_graph_teardown() {
    let source = Event::<i32>::new("source");
    let sub = source.watch(|_| {});
    drop(source);
    sub.dispose();
    sub.dispose();
}

/// A link added while a sweep is running takes effect starting with the
/// next sweep, never retroactively within the current one.
#[test]
fn links_added_mid_sweep_take_effect_next_sweep() {
    let source = Event::<i32>::new("source");
    let mapped = source.map(|n| n);

    let count = Arc::new(AtomicI32::new(0));
    let added = Arc::new(AtomicBool::new(false));
    let late_subs = Arc::new(Mutex::new(Vec::new()));

    let mapped_clone = mapped.clone();
    let count_clone = count.clone();
    let added_clone = added.clone();
    let subs_clone = late_subs.clone();
    let _sub = source.watch(move |_| {
        if !added_clone.swap(true, Ordering::SeqCst) {
            let sink = count_clone.clone();
            let sub = mapped_clone.watch(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            });
            subs_clone.lock().unwrap().push(sub);
        }
    });

    // The watcher on `mapped` is wired while this sweep is in flight:
    // `mapped` has not been visited yet, but the new link must not fire.
    source.trigger(1).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    source.trigger(2).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// The same edge registered on several sources delivers once per source
/// occurrence.
#[test]
fn fan_in_delivers_once_per_source_occurrence() {
    let left = Event::<i32>::new("left");
    let right = Event::<i32>::new("right");
    let merged = Event::<i32>::new("merged");

    create_link(
        &[left.node().clone(), right.node().clone()],
        LinkConfig {
            children: vec![merged.node().clone()],
            scope: Scope::empty(),
            stages: smallvec![],
            kind: LinkKind::Crosslink,
        },
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = merged.watch(move |n| sink.lock().unwrap().push(n));

    left.trigger(1).unwrap();
    right.trigger(2).unwrap();
    left.trigger(3).unwrap();
    assert_eq!(*seen.lock().unwrap(), [1, 2, 3]);
}

struct Collector {
    values: Arc<Mutex<Vec<String>>>,
}

impl Observer<String> for Collector {
    fn next(&self, value: String) {
        self.values.lock().unwrap().push(value);
    }
}

/// Any object exposing a `next` operation can subscribe; it receives one
/// call per delivered value.
#[test]
fn subscribe_adapts_an_observer() {
    let source = Event::<String>::new("source");
    let values = Arc::new(Mutex::new(Vec::new()));
    let _sub = source.subscribe(Collector {
        values: values.clone(),
    });

    source.trigger("one".to_string()).unwrap();
    source.trigger("two".to_string()).unwrap();
    assert_eq!(*values.lock().unwrap(), ["one", "two"]);
}

/// The failure event composes like any other event.
#[test]
fn fault_events_compose_with_combinators() {
    let source = Event::<i32>::new("source");
    let sub = source.try_watch(|n| {
        if n < 0 {
            Err(StageError::new(format!("negative: {n}")))
        } else {
            Ok(())
        }
    });

    let messages = sub.fault().map(|fault| fault.error.message().to_string());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _fault_sub = messages.watch(move |m| sink.lock().unwrap().push(m));

    source.trigger(1).unwrap();
    source.trigger(-2).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["negative: -2"]);
}
