//! Link construction and disposal.
//!
//! A link is a directed edge with its own stage pipeline and captured
//! scope. One link may fan out to many children, and the same link may be
//! registered on several sources (fan-in); each source occurrence runs the
//! edge pipeline once.
//!
//! Wiring a link raises every child's priority above every source's, and
//! the raise is relaxed forward through the child's existing descendants —
//! a bounded worklist walk, never a full graph recomputation. Exercised
//! wiring must stay acyclic; the kernel does not detect cycles, and cyclic
//! wiring is a caller error with unbounded relaxation.
//!
//! Links created while a sweep is running take effect starting with the
//! next sweep. Disposal is explicit, idempotent, and safe after the
//! surrounding graph has been torn down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;

use crate::registry::NodeId;
use crate::scope::Scope;
use crate::stage::{Pipeline, Stage};

use super::node::{Node, WeakNode};
use super::scheduler;

/// Connection kind recorded in link metadata, for introspection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Map,
    Filter,
    Prepend,
    Watch,
    Crosslink,
}

/// Metadata describing a link: its kind and the ids it connects.
#[derive(Debug, Clone, Serialize)]
pub struct LinkMeta {
    pub kind: LinkKind,
    pub sources: SmallVec<[NodeId; 1]>,
    pub children: SmallVec<[NodeId; 1]>,
}

/// Configuration for a new link.
pub struct LinkConfig {
    /// Nodes enqueued with the edge pipeline's final continue value.
    pub children: Vec<Node>,
    /// Captured values shared by every stage on this link.
    pub scope: Scope,
    /// The edge pipeline, distinct from any child's own pipeline.
    pub stages: Pipeline,
    /// Connection kind, recorded for introspection.
    pub kind: LinkKind,
}

struct EdgeInner {
    stages: Pipeline,
    scope: Scope,
    children: SmallVec<[Node; 1]>,
    meta: LinkMeta,
    disposed: AtomicBool,
    /// Count of sweeps started when this edge was wired; a sweep only
    /// traverses edges born before it.
    born: u64,
}

/// A wired link. Clones share the edge.
#[derive(Clone)]
pub(crate) struct Edge {
    inner: Arc<EdgeInner>,
}

impl Edge {
    pub(crate) fn stages(&self) -> &[Stage] {
        &self.inner.stages
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub(crate) fn children(&self) -> &[Node] {
        &self.inner.children
    }

    pub(crate) fn meta(&self) -> &LinkMeta {
        &self.inner.meta
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn born(&self) -> u64 {
        self.inner.born
    }

    pub(crate) fn ptr_eq(&self, other: &Edge) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn mark_disposed(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }
}

/// Wire a link from `sources` to the configured children.
///
/// The edge is appended to each source's outgoing list, so sibling links
/// fire in registration order. The returned [`Disposer`] detaches exactly
/// this edge.
pub fn create_link(sources: &[Node], config: LinkConfig) -> Disposer {
    let LinkConfig {
        children,
        scope,
        stages,
        kind,
    } = config;

    let meta = LinkMeta {
        kind,
        sources: sources.iter().map(Node::id).collect(),
        children: children.iter().map(Node::id).collect(),
    };
    let edge = Edge {
        inner: Arc::new(EdgeInner {
            stages,
            scope,
            children: children.into_iter().collect(),
            meta,
            disposed: AtomicBool::new(false),
            born: scheduler::sweeps_started(),
        }),
    };

    // Children must execute after every source in a sweep.
    if let Some(max_source) = sources.iter().map(Node::priority).max() {
        for child in edge.children() {
            raise_priority(child, max_source + 1);
        }
    }

    for source in sources {
        source.push_edge(edge.clone());
    }
    tracing::debug!(
        target: "conflux::graph",
        kind = ?edge.meta().kind,
        sources = ?edge.meta().sources,
        children = ?edge.meta().children,
        "link created"
    );

    Disposer {
        inner: Arc::new(DisposerInner {
            sources: sources.iter().map(Node::downgrade).collect(),
            edge,
            done: AtomicBool::new(false),
        }),
    }
}

/// Raise `node`'s priority to at least `floor`, then relax the raise
/// forward through its existing children.
fn raise_priority(node: &Node, floor: u64) {
    let mut worklist = VecDeque::new();
    worklist.push_back((node.clone(), floor));

    while let Some((node, floor)) = worklist.pop_front() {
        if node.priority() >= floor {
            continue;
        }
        node.set_priority(floor);
        for edge in node.edges_snapshot() {
            for child in edge.children() {
                worklist.push_back((child.clone(), floor + 1));
            }
        }
    }
}

struct DisposerInner {
    sources: Vec<WeakNode>,
    edge: Edge,
    done: AtomicBool,
}

/// Detaches exactly one link.
///
/// Repeated invocation is a no-op, and invocation after the surrounding
/// graph has been torn down is safe.
#[derive(Clone)]
pub struct Disposer {
    inner: Arc<DisposerInner>,
}

impl Disposer {
    /// Detach the link: sweeps no longer traverse it. Occurrences its
    /// children already have in the queue still run.
    pub fn dispose(&self) {
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.edge.mark_disposed();
        for source in &self.inner.sources {
            if let Some(source) = source.upgrade() {
                source.remove_edge(&self.inner.edge);
            }
        }
        tracing::debug!(
            target: "conflux::graph",
            sources = ?self.inner.edge.meta().sources,
            children = ?self.inner.edge.meta().children,
            "link disposed"
        );
    }
}
