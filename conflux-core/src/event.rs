//! Typed event handles and combinators.
//!
//! An [`Event<T>`] is the externally visible handle around one graph node:
//! triggering it starts a sweep, and the attached combinators derive new
//! events by wiring links. The handle is a struct with a fixed method
//! table — invocation is the explicit [`Event::trigger`] operation.
//!
//! Combinators never hide captured state in closure environments at the
//! kernel boundary: the mapping function, predicate, or fail target of a
//! link lives in that link's [`Scope`] under a conventional key, and the
//! stage functions read it from there.
//!
//! # Derived names
//!
//! Derived events are named after their source for diagnostics: mapping
//! yields `"a → *"`, filtering `"a →? *"`, adapters `"* → a"`, and each
//! subscription's failure event `"fail a"`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::smallvec;

use crate::error::{Fault, StageError, SweepFault};
use crate::graph::{
    create_link, launch, Binding, Disposer, LinkConfig, LinkKind, Node, NodeKind, NodeMeta, OpKind,
    SweepContext,
};
use crate::naming::CompositeName;
use crate::payload::{downcast, downcast_ref, is_absent, payload, Absent, Payload};
use crate::registry::{IdRegistry, NodeId};
use crate::scope::Scope;
use crate::stage::Stage;

/// Transform captured into a link scope by the `map` family.
struct Handler(Arc<dyn Fn(Payload) -> Result<Payload, StageError> + Send + Sync>);

/// Predicate captured into a link scope by `filter`.
struct Predicate(Arc<dyn Fn(&Payload) -> bool + Send + Sync>);

/// Callback captured into a link scope by `watch`.
struct Watcher(Arc<dyn Fn(Payload) -> Result<(), StageError> + Send + Sync>);

/// Fail target captured into a link scope by `watch`.
struct FailRoute(Node);

/// A callable, composable handle on one dataflow node.
///
/// Cloning shares the node. An event is either root-owned (created with
/// [`Event::new`]) or derived — created and owned by a combinator together
/// with the link feeding it.
pub struct Event<T> {
    node: Node,
    name: CompositeName,
    parent: Option<CompositeName>,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            name: self.name.clone(),
            parent: self.parent.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.node.id())
            .field("name", &self.name.full_name())
            .finish()
    }
}

impl<T> Event<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a named root event.
    pub fn new(name: impl Into<String>) -> Self {
        Self::fabricate(Some(name.into()), None)
    }

    /// Create a named event under a parent naming context.
    pub fn new_in(name: impl Into<String>, parent: &CompositeName) -> Self {
        Self::fabricate(Some(name.into()), Some(parent))
    }

    /// Create an event whose name defaults to its id.
    pub fn anonymous() -> Self {
        Self::fabricate(None, None)
    }

    fn fabricate(name: Option<String>, parent: Option<&CompositeName>) -> Self {
        let id = IdRegistry::process().next();
        let short = name.unwrap_or_else(|| id.to_string());
        let name = CompositeName::new(short, parent);
        let node = Node::create(
            NodeMeta {
                kind: NodeKind::Event,
                id,
                name: name.full_name().to_string(),
                binding: None,
                extra: None,
            },
            smallvec![Stage::emit(name.full_name())],
        );
        Self {
            node,
            name,
            parent: parent.cloned(),
            _payload: PhantomData,
        }
    }

    /// Trigger a propagation sweep carrying `value`.
    ///
    /// Fire-and-forget: the payload comes back unchanged once the sweep
    /// has fully drained; nothing derived from propagation is returned. A
    /// stage failure with no declared fail target surfaces as the error.
    pub fn trigger(&self, value: T) -> Result<T, SweepFault> {
        launch(&self.node, payload(value.clone()))?;
        Ok(value)
    }

    /// Derive an event carrying `f(value)` for every occurrence of this
    /// event.
    pub fn map<U, F>(&self, f: F) -> Event<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.derive_map(move |value| Ok(f(value)))
    }

    /// Fallible `map`: an `Err` is a stage failure, escalated out of the
    /// trigger unless the source node declares a fail route.
    pub fn try_map<U, F>(&self, f: F) -> Event<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U, StageError> + Send + Sync + 'static,
    {
        self.derive_map(f)
    }

    fn derive_map<U, F>(&self, f: F) -> Event<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U, StageError> + Send + Sync + 'static,
    {
        let mapped =
            Event::<U>::fabricate(Some(format!("{} → *", self.short_name())), self.parent.as_ref());
        mapped.node.bind(Binding {
            operation: OpKind::Map,
            sources: smallvec![self.id()],
        });

        let handler = Handler(Arc::new(move |value: Payload| {
            let value = expect_payload::<T>(&value)?;
            Ok(payload(f(value)?))
        }));
        create_link(
            std::slice::from_ref(&self.node),
            LinkConfig {
                children: vec![mapped.node.clone()],
                scope: Scope::builder().capture("handler", handler).build(),
                stages: smallvec![Stage::compute(apply_handler)],
                kind: LinkKind::Map,
            },
        );
        mapped
    }

    /// Derive an event re-emitting only occurrences satisfying `pred`.
    pub fn filter<F>(&self, pred: F) -> Event<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let filtered =
            Self::fabricate(Some(format!("{} →? *", self.short_name())), self.parent.as_ref());
        filtered.node.bind(Binding {
            operation: OpKind::Filter,
            sources: smallvec![self.id()],
        });

        let predicate = Predicate(Arc::new(move |value: &Payload| {
            downcast_ref::<T>(value).is_some_and(&pred)
        }));
        create_link(
            std::slice::from_ref(&self.node),
            LinkConfig {
                children: vec![filtered.node.clone()],
                scope: Scope::builder().capture("predicate", predicate).build(),
                stages: smallvec![Stage::filter(apply_predicate)],
                kind: LinkKind::Filter,
            },
        );
        filtered
    }

    /// Partial transform: occurrences where `f` returns `None` are
    /// dropped; the rest carry the unwrapped value.
    ///
    /// Wired as two single-purpose stages: a compute producing either the
    /// mapped value or the `Absent` marker, then a filter dropping the
    /// marker.
    pub fn filter_map<U, F>(&self, f: F) -> Event<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let mapped =
            Event::<U>::fabricate(Some(format!("{} →? *", self.short_name())), self.parent.as_ref());
        mapped.node.bind(Binding {
            operation: OpKind::Filter,
            sources: smallvec![self.id()],
        });

        let handler = Handler(Arc::new(move |value: Payload| {
            let value = expect_payload::<T>(&value)?;
            Ok(match f(value) {
                Some(mapped) => payload(mapped),
                None => payload(Absent),
            })
        }));
        create_link(
            std::slice::from_ref(&self.node),
            LinkConfig {
                children: vec![mapped.node.clone()],
                scope: Scope::builder().capture("handler", handler).build(),
                stages: smallvec![Stage::compute(apply_handler), Stage::filter(defined)],
                kind: LinkKind::Filter,
            },
        );
        mapped
    }

    /// Create an adapter event: triggering the adapter with `value` is
    /// equivalent to triggering this event with `f(value)`.
    pub fn prepend<V, F>(&self, f: F) -> Event<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(V) -> T + Send + Sync + 'static,
    {
        let adapter =
            Event::<V>::fabricate(Some(format!("* → {}", self.short_name())), self.parent.as_ref());
        adapter.node.bind(Binding {
            operation: OpKind::Prepend,
            sources: smallvec![self.id()],
        });

        let handler = Handler(Arc::new(move |value: Payload| {
            let value = expect_payload::<V>(&value)?;
            Ok(payload(f(value)))
        }));
        create_link(
            std::slice::from_ref(&adapter.node),
            LinkConfig {
                children: vec![self.node.clone()],
                scope: Scope::builder().capture("handler", handler).build(),
                stages: smallvec![Stage::compute(apply_handler)],
                kind: LinkKind::Prepend,
            },
        );
        adapter
    }

    /// Observe every occurrence.
    ///
    /// The callback cannot fail here, but the returned subscription still
    /// exposes the dedicated failure event for composition.
    pub fn watch<F>(&self, f: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.try_watch(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Observe every occurrence with a fallible callback.
    ///
    /// An `Err` from `f` is delivered to the subscription's dedicated
    /// failure event as a [`Fault`] occurrence — exactly once per failure
    /// — and propagation of that occurrence stops there. The trigger that
    /// caused the failure returns normally.
    pub fn try_watch<F>(&self, f: F) -> Subscription
    where
        F: Fn(T) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let fault =
            Event::<Fault>::fabricate(Some(format!("fail {}", self.short_name())), self.parent.as_ref());

        let watcher = Watcher(Arc::new(move |value: Payload| {
            let value = expect_payload::<T>(&value)?;
            f(value)
        }));
        let disposer = create_link(
            std::slice::from_ref(&self.node),
            LinkConfig {
                children: Vec::new(),
                scope: Scope::builder()
                    .capture("watcher", watcher)
                    .capture("fail", FailRoute(fault.node.clone()))
                    .build(),
                stages: smallvec![Stage::run_with_fail(apply_watcher, forward_failure)],
                kind: LinkKind::Watch,
            },
        );
        Subscription { disposer, fault }
    }

    /// Adapt an observer: `observer.next(value)` is invoked once per
    /// occurrence delivered to this event.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<T> + Send + Sync + 'static,
    {
        self.watch(move |value| observer.next(value))
    }

    /// The id of the underlying node.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// The unqualified name.
    pub fn short_name(&self) -> &str {
        self.name.short_name()
    }

    /// The fully-qualified display name.
    pub fn full_name(&self) -> &str {
        self.name.full_name()
    }

    /// The composite name, usable as a parent naming context.
    pub fn composite_name(&self) -> &CompositeName {
        &self.name
    }

    /// The underlying graph node — the escape hatch for wiring custom
    /// links with [`create_link`].
    pub fn node(&self) -> &Node {
        &self.node
    }
}

fn expect_payload<T: Clone + Send + Sync + 'static>(value: &Payload) -> Result<T, StageError> {
    downcast::<T>(value).ok_or_else(|| StageError::new("payload type mismatch"))
}

fn apply_handler(
    value: Payload,
    scope: &Scope,
    _ctx: &mut SweepContext,
) -> Result<Payload, StageError> {
    let handler = scope.get::<Handler>("handler").expect("link scope carries a handler");
    (handler.0)(value)
}

fn apply_predicate(value: &Payload, scope: &Scope, _ctx: &mut SweepContext) -> bool {
    let predicate = scope
        .get::<Predicate>("predicate")
        .expect("link scope carries a predicate");
    (predicate.0)(value)
}

fn defined(value: &Payload, _scope: &Scope, _ctx: &mut SweepContext) -> bool {
    !is_absent(value)
}

fn apply_watcher(value: Payload, scope: &Scope, _ctx: &mut SweepContext) -> Result<(), StageError> {
    let watcher = scope.get::<Watcher>("watcher").expect("watch scope carries a watcher");
    (watcher.0)(value)
}

fn forward_failure(error: StageError, scope: &Scope, ctx: &mut SweepContext) {
    let route = scope.get::<FailRoute>("fail").expect("watch scope carries a fail route");
    ctx.defer(&route.0, payload(Fault { error }));
}

/// Anything exposing a `next` operation can observe an event.
pub trait Observer<T> {
    /// Receive one delivered value.
    fn next(&self, value: T);
}

/// Handle on one watch link: dispose it, or compose on its failures.
pub struct Subscription {
    disposer: Disposer,
    fault: Event<Fault>,
}

impl Subscription {
    /// Detach the watcher. Idempotent, and safe after the watched event's
    /// graph has been torn down.
    pub fn dispose(&self) {
        self.disposer.dispose();
    }

    /// The dedicated event receiving this subscription's failures.
    pub fn fault(&self) -> &Event<Fault> {
        &self.fault
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("fault", &self.fault)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
