//! Error taxonomy for the propagation kernel.
//!
//! Three distinct situations can end a branch of a sweep:
//!
//! 1. A `filter` stage rejects a value. Not an error: the branch halts
//!    silently.
//! 2. A `compute` or `run` stage fails. The failure is caught at the stage
//!    boundary as a [`StageError`] and routed to a declared fail target.
//! 3. A stage failure has no declared fail target. It escalates out of
//!    `launch` as a [`SweepFault`], fatal for that trigger only.
//!
//! A declared fail target receives exactly one [`Fault`] occurrence per
//! failure and composes like any other event; absence of a fail target is
//! an explicit escalation, never a swallow.

use thiserror::Error;

use crate::registry::NodeId;

/// A failure raised by a `compute` or `run` stage.
///
/// Cloneable so the same failure can be carried into a [`Fault`] payload
/// and reported through the escalation path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageError {
    message: String,
}

impl StageError {
    /// Create a stage error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StageError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StageError {
    fn from(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A stage failure that had no declared fail target.
///
/// Returned from `launch` (and therefore from `Event::trigger`) to the
/// caller that started the sweep. Kernel state is left clean: subsequent,
/// independent triggers are unaffected.
#[derive(Debug, Clone, Error)]
#[error("unhandled stage failure at node {node}: {error}")]
pub struct SweepFault {
    /// Node whose pipeline (its own or an outgoing link's) failed.
    pub node: NodeId,
    /// The underlying stage failure.
    pub error: StageError,
}

/// The occurrence delivered to a fail target when a stage fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// The stage failure that produced this occurrence.
    pub error: StageError,
}
