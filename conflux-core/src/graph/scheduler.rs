//! Kernel scheduler.
//!
//! [`launch`] drives one full propagation sweep per external trigger: a
//! priority-ordered traversal of the graph reachable from the root node,
//! executing each visited node's own pipeline and then the pipelines of
//! its live outgoing links, fanning continue-values out to children until
//! the ready queue drains.
//!
//! # Ordering
//!
//! The ready queue pops the lowest priority number first; ties resolve by
//! insertion sequence, so sibling links fire in registration order and a
//! sweep is fully deterministic.
//!
//! # Re-entrancy
//!
//! A trigger issued while a sweep is already running on this thread — for
//! example from inside a run-stage callback — merges into the active
//! queue. The outermost `launch` drains everything before returning, so
//! two independently-initiated external triggers never interleave their
//! effects.
//!
//! # Failures
//!
//! A stage failure routes to the visited node's fail route when one is
//! declared; otherwise it aborts the sweep and escalates to the caller as
//! a [`SweepFault`]. The thread-local sweep state is cleared either way,
//! so later, independent triggers start from a clean kernel.

use std::cell::RefCell;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Fault, StageError, SweepFault};
use crate::payload::{payload, Payload};
use crate::registry::NodeId;
use crate::scope::Scope;
use crate::stage::{run_pipeline, StageOutcome};

use super::node::Node;

/// Count of sweeps started process-wide. Links are stamped with this at
/// creation so additions made during a sweep take effect the next sweep.
static SWEEPS_STARTED: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static ACTIVE: RefCell<Option<ActiveSweep>> = RefCell::new(None);
}

pub(crate) fn sweeps_started() -> u64 {
    SWEEPS_STARTED.load(Ordering::Relaxed)
}

/// One queued occurrence: a node to visit and the value it carries.
struct Job {
    priority: u64,
    seq: u64,
    node: Node,
    value: Payload,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// The sweep currently draining on this thread.
///
/// `BinaryHeap` is a max-heap; jobs are wrapped in `Reverse` so the lowest
/// (priority, seq) pair pops first.
struct ActiveSweep {
    serial: u64,
    next_seq: u64,
    queue: BinaryHeap<Reverse<Job>>,
}

impl ActiveSweep {
    fn new(serial: u64) -> Self {
        Self {
            serial,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    fn push(&mut self, node: &Node, value: Payload) {
        let job = Job {
            priority: node.priority(),
            seq: self.next_seq,
            node: node.clone(),
            value,
        };
        self.next_seq += 1;
        self.queue.push(Reverse(job));
    }

    fn pop(&mut self) -> Option<Job> {
        self.queue.pop().map(|Reverse(job)| job)
    }
}

/// Execution context handed to stage functions.
///
/// Identifies the node being visited and lets a stage defer additional
/// work — fail deliveries, re-entrant occurrences — onto the active
/// sweep's queue.
pub struct SweepContext {
    node: NodeId,
}

impl SweepContext {
    pub(crate) fn new(node: NodeId) -> Self {
        Self { node }
    }

    /// Id of the node whose pipeline is executing.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Enqueue `value` for `node` on the active sweep.
    pub fn defer(&mut self, node: &Node, value: Payload) {
        enqueue_active(node, value);
    }
}

fn enqueue_active(node: &Node, value: Payload) {
    ACTIVE.with(|active| {
        let mut active = active.borrow_mut();
        match active.as_mut() {
            Some(sweep) => sweep.push(node, value),
            // Stages only run inside sweeps; a defer outside one has
            // nowhere to go.
            None => debug_assert!(false, "defer outside an active sweep"),
        }
    });
}

/// Clears the thread-local sweep on every exit path, including the
/// escalation one, so a faulted sweep never leaks queued work into the
/// next trigger.
struct SweepGuard;

impl Drop for SweepGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.borrow_mut().take());
    }
}

/// Start (or merge) a propagation sweep rooted at `node`.
///
/// Returns once every occurrence causally reachable from this trigger has
/// been processed, or with a [`SweepFault`] if a stage failure had no
/// declared fail route. If a sweep is already active on this thread, the
/// occurrence merges into its queue and the call returns immediately; the
/// outermost `launch` drains it.
pub fn launch(node: &Node, value: Payload) -> Result<(), SweepFault> {
    let merged = ACTIVE.with(|active| {
        let mut active = active.borrow_mut();
        match active.as_mut() {
            Some(sweep) => {
                sweep.push(node, value.clone());
                true
            }
            None => false,
        }
    });
    if merged {
        return Ok(());
    }

    let serial = SWEEPS_STARTED.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::debug!(target: "conflux::sweep", serial, root = %node.id(), "sweep started");
    ACTIVE.with(|active| {
        let mut sweep = ActiveSweep::new(serial);
        sweep.push(node, value);
        *active.borrow_mut() = Some(sweep);
    });

    let _guard = SweepGuard;
    drain()
}

fn drain() -> Result<(), SweepFault> {
    let serial = ACTIVE.with(|active| {
        active.borrow().as_ref().expect("active sweep installed").serial
    });
    while let Some(job) = ACTIVE.with(|active| active.borrow_mut().as_mut().and_then(ActiveSweep::pop))
    {
        visit(&job.node, job.value, serial)?;
    }
    tracing::debug!(target: "conflux::sweep", serial, "sweep drained");
    Ok(())
}

/// Execute one queued occurrence: the node's own pipeline, then each live
/// outgoing edge pipeline, enqueuing children on continue.
fn visit(node: &Node, value: Payload, serial: u64) -> Result<(), SweepFault> {
    let mut ctx = SweepContext::new(node.id());
    let own_scope = Scope::empty();

    match run_pipeline(node.stages(), value, &own_scope, &mut ctx) {
        StageOutcome::Continue(value) => {
            // Snapshot before running edge pipelines: stages may add or
            // dispose links, and the traversal already computed for this
            // visit must not shift under them.
            for edge in node.live_edges(serial) {
                if edge.is_disposed() {
                    continue;
                }
                match run_pipeline(edge.stages(), value.clone(), edge.scope(), &mut ctx) {
                    StageOutcome::Continue(out) => {
                        for child in edge.children() {
                            enqueue_active(child, out.clone());
                        }
                    }
                    StageOutcome::Stop => {}
                    StageOutcome::Fail(error) => route_failure(node, error)?,
                }
            }
            Ok(())
        }
        StageOutcome::Stop => Ok(()),
        StageOutcome::Fail(error) => route_failure(node, error),
    }
}

fn route_failure(node: &Node, error: StageError) -> Result<(), SweepFault> {
    match node.fail_route() {
        Some(fail) => {
            tracing::debug!(
                target: "conflux::sweep",
                node = %node.id(),
                fail = %fail.id(),
                %error,
                "stage failure routed"
            );
            enqueue_active(fail, payload(Fault { error }));
            Ok(())
        }
        None => {
            tracing::warn!(target: "conflux::sweep", node = %node.id(), %error, "unhandled stage failure");
            Err(SweepFault {
                node: node.id(),
                error,
            })
        }
    }
}
