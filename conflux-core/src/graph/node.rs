//! Graph nodes.
//!
//! A node is a vertex in the dataflow graph: an identity, a tagged
//! metadata record, its own stage pipeline (run once per sweep visit), a
//! scheduling priority, and the outgoing links fanning its output out to
//! children.
//!
//! `Node` is a cheap-clone handle: clones share one underlying vertex, and
//! a vertex lives exactly as long as some handle or some link refers to
//! it. Nothing removes a node directly — a derived node disappears when
//! the link that owns it is disposed and no external handle retains it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use smallvec::SmallVec;

use crate::registry::NodeId;
use crate::stage::Pipeline;

use super::link::{Edge, LinkMeta};

/// Role a node plays in the graph.
///
/// Every vertex is currently an event node; the enum (together with
/// [`NodeMeta::extra`]) leaves room for further subtypes without changing
/// the metadata shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Event,
}

/// Combinator operation recorded in a derivation binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Map,
    Filter,
    Prepend,
}

/// One-time record of the derivation that produced a node: which
/// combinator, wired to which node id(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub operation: OpKind,
    pub sources: SmallVec<[NodeId; 1]>,
}

/// Tagged metadata record describing a node.
///
/// Consumed by diagnostics and tracing tooling. The kernel itself only
/// reads the display name (emit tagging) and guards the one-time binding
/// write.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMeta {
    pub kind: NodeKind,
    pub id: NodeId,
    pub name: String,
    pub binding: Option<Binding>,
    /// Reserved for forward-compatible extension payloads.
    pub extra: Option<serde_json::Value>,
}

/// Serializable wrapper distinguishing node metadata from link metadata in
/// diagnostic output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum Meta {
    Node(NodeMeta),
    Crosslink(LinkMeta),
}

struct NodeInner {
    id: NodeId,
    meta: RwLock<NodeMeta>,
    stages: Pipeline,
    /// Strictly exceeds the priority of every node that can reach this one.
    priority: AtomicU64,
    fail_route: Option<Node>,
    /// Outgoing links in registration order.
    outgoing: RwLock<Vec<Edge>>,
}

/// A vertex handle. Clones share the underlying vertex.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node with the given metadata and own pipeline.
    pub fn create(meta: NodeMeta, stages: Pipeline) -> Self {
        Self::build(meta, stages, None)
    }

    /// Create a node whose unhandled stage failures are routed to `fail`
    /// as `Fault` occurrences instead of escalating.
    pub fn create_with_fail_route(meta: NodeMeta, stages: Pipeline, fail: &Node) -> Self {
        Self::build(meta, stages, Some(fail.clone()))
    }

    fn build(meta: NodeMeta, stages: Pipeline, fail_route: Option<Node>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: meta.id,
                meta: RwLock::new(meta),
                stages,
                priority: AtomicU64::new(0),
                fail_route,
                outgoing: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The node's unique id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The node's scheduling priority.
    pub fn priority(&self) -> u64 {
        self.inner.priority.load(Ordering::Relaxed)
    }

    pub(crate) fn set_priority(&self, priority: u64) {
        self.inner.priority.store(priority, Ordering::Relaxed);
    }

    /// A snapshot of the node's metadata.
    pub fn meta(&self) -> NodeMeta {
        self.inner.meta.read().clone()
    }

    /// Record the derivation that produced this node.
    ///
    /// A one-time write performed by a combinator immediately after
    /// creation, before the node is handed to the caller.
    pub fn bind(&self, binding: Binding) {
        let mut meta = self.inner.meta.write();
        debug_assert!(
            meta.binding.is_none(),
            "derivation binding already recorded for node {}",
            meta.id
        );
        meta.binding = Some(binding);
    }

    /// Serialize this node's metadata for diagnostics tooling.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::to_value(Meta::Node(self.meta())).expect("node metadata serializes")
    }

    /// Metadata of the outgoing links still attached, in registration
    /// order. For introspection only.
    pub fn outgoing_links(&self) -> Vec<LinkMeta> {
        self.inner
            .outgoing
            .read()
            .iter()
            .filter(|edge| !edge.is_disposed())
            .map(|edge| edge.meta().clone())
            .collect()
    }

    pub(crate) fn stages(&self) -> &Pipeline {
        &self.inner.stages
    }

    pub(crate) fn fail_route(&self) -> Option<&Node> {
        self.inner.fail_route.as_ref()
    }

    pub(crate) fn push_edge(&self, edge: Edge) {
        self.inner.outgoing.write().push(edge);
    }

    pub(crate) fn remove_edge(&self, edge: &Edge) {
        self.inner.outgoing.write().retain(|e| !e.ptr_eq(edge));
    }

    /// Snapshot of the edges a sweep with the given serial may traverse:
    /// not disposed, and created before that sweep started.
    pub(crate) fn live_edges(&self, serial: u64) -> Vec<Edge> {
        self.inner
            .outgoing
            .read()
            .iter()
            .filter(|edge| !edge.is_disposed() && edge.born() < serial)
            .cloned()
            .collect()
    }

    /// Snapshot of all attached edges, for priority relaxation.
    pub(crate) fn edges_snapshot(&self) -> Vec<Edge> {
        self.inner
            .outgoing
            .read()
            .iter()
            .filter(|edge| !edge.is_disposed())
            .cloned()
            .collect()
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Non-owning node handle, used by disposers so a dispose after the graph
/// is otherwise torn down is a no-op.
#[derive(Clone)]
pub(crate) struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }
}
