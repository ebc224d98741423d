//! Identifier registry.
//!
//! Issues globally unique, monotonically increasing node identifiers. The
//! registry is an explicit object rather than a hidden module-level
//! counter: the process-wide instance lives for the lifetime of the
//! process and is never reset, while tests may construct their own fresh
//! instances.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for a node in the dataflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Issues fresh [`NodeId`]s with no reuse.
#[derive(Debug)]
pub struct IdRegistry {
    counter: AtomicU64,
}

impl IdRegistry {
    /// Create a fresh registry starting at id 0.
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// The process-wide registry.
    ///
    /// Node construction draws from it unless a caller supplies its own
    /// instance (test isolation).
    pub fn process() -> &'static IdRegistry {
        static PROCESS: IdRegistry = IdRegistry::new();
        &PROCESS
    }

    /// Issue the next identifier.
    pub fn next(&self) -> NodeId {
        NodeId(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
