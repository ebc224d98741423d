//! Dataflow graph.
//!
//! This module implements the node/link graph that occurrences propagate
//! through, and the scheduler that drives one deterministic sweep per
//! external trigger.
//!
//! # Overview
//!
//! - Nodes carry their own stage pipeline, a tagged metadata record, and
//!   an integer scheduling priority.
//! - Links are directed edges with their own pipeline and captured scope;
//!   they may fan out to many children and be registered on many sources.
//! - The scheduler walks the graph from a trigger's root node in priority
//!   order, lowest number first, so every ancestor executes before its
//!   descendants.
//!
//! # Design Decisions
//!
//! 1. Priorities are maintained incrementally as links are wired: a new
//!    link raises each child above its sources and relaxes the raise
//!    forward through existing descendants, instead of recomputing a
//!    topological order per sweep.
//!
//! 2. Graph mutation and traversal share one logical thread. Sweeps
//!    snapshot the edges they traverse, so links added or disposed while
//!    a sweep runs never corrupt that sweep's computed order: additions
//!    take effect the next sweep, disposals stop further traversal.
//!
//! 3. Node and link metadata are serializable tagged records, kept for
//!    diagnostics tooling only; the kernel never branches on them.

mod link;
mod node;
mod scheduler;

pub use link::{create_link, Disposer, LinkConfig, LinkKind, LinkMeta};
pub use node::{Binding, Meta, Node, NodeKind, NodeMeta, OpKind};
pub use scheduler::{launch, SweepContext};
