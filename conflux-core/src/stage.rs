//! Stage library.
//!
//! A pipeline is an ordered sequence of stages. Each stage is a pure
//! function of `(value, scope, context)` producing one of three outcomes:
//! continue with a (possibly new) value, stop the branch, or fail. The
//! executor runs stages sequentially and short-circuits on the first
//! non-continue outcome.
//!
//! # Stage kinds
//!
//! - **emit** — tags the occurrence with the owning node's display name
//!   for diagnostics; always continues with the value unchanged.
//! - **compute** — applies a fallible transform; failure is caught at the
//!   stage boundary.
//! - **filter** — continues with the unchanged value when the predicate
//!   holds, otherwise stops the branch. Rejection is not an error.
//! - **run** — terminal side effect. Success continues with the value
//!   unchanged; failure is delivered to the declared fail handler (which
//!   resolves the stage to a stop), or, with no handler, becomes a stage
//!   failure for the scheduler to escalate.
//!
//! Stages are stateless across invocations. Anything a stage needs beyond
//! the value itself lives in the link's [`Scope`].

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::StageError;
use crate::graph::SweepContext;
use crate::payload::Payload;
use crate::scope::Scope;

/// Result of running one stage (or a whole pipeline) on a value.
pub enum StageOutcome {
    /// Pass the value on to the next stage, and ultimately to children.
    Continue(Payload),
    /// Halt this branch; nothing is forwarded. Not an error.
    Stop,
    /// A stage failed; captured at the stage boundary.
    Fail(StageError),
}

impl StageOutcome {
    /// The carried value, if the outcome is `Continue`.
    pub fn continued(self) -> Option<Payload> {
        match self {
            Self::Continue(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue(_) => f.write_str("Continue(..)"),
            Self::Stop => f.write_str("Stop"),
            Self::Fail(error) => f.debug_tuple("Fail").field(error).finish(),
        }
    }
}

/// Transform applied by a compute stage.
pub type ComputeFn =
    Arc<dyn Fn(Payload, &Scope, &mut SweepContext) -> Result<Payload, StageError> + Send + Sync>;

/// Predicate applied by a filter stage.
pub type FilterFn = Arc<dyn Fn(&Payload, &Scope, &mut SweepContext) -> bool + Send + Sync>;

/// Side effect invoked by a run stage.
pub type RunFn =
    Arc<dyn Fn(Payload, &Scope, &mut SweepContext) -> Result<(), StageError> + Send + Sync>;

/// Handler a run stage delivers its failure to.
pub type FailFn = Arc<dyn Fn(StageError, &Scope, &mut SweepContext) + Send + Sync>;

/// One step in a pipeline.
#[derive(Clone)]
pub enum Stage {
    /// Diagnostic tag carrying the owning node's display name.
    Emit { name: Arc<str> },
    /// Fallible transform of the value.
    Compute { f: ComputeFn },
    /// Keep-or-drop decision on the value.
    Filter { pred: FilterFn },
    /// Terminal side effect with an optional fail handler.
    Run { f: RunFn, fail: Option<FailFn> },
}

impl Stage {
    /// An emit stage tagging occurrences with `name`.
    pub fn emit(name: impl Into<Arc<str>>) -> Self {
        Self::Emit { name: name.into() }
    }

    /// A compute stage applying `f`.
    pub fn compute<F>(f: F) -> Self
    where
        F: Fn(Payload, &Scope, &mut SweepContext) -> Result<Payload, StageError>
            + Send
            + Sync
            + 'static,
    {
        Self::Compute { f: Arc::new(f) }
    }

    /// A filter stage keeping values for which `pred` holds.
    pub fn filter<F>(pred: F) -> Self
    where
        F: Fn(&Payload, &Scope, &mut SweepContext) -> bool + Send + Sync + 'static,
    {
        Self::Filter { pred: Arc::new(pred) }
    }

    /// A run stage with no fail handler: a failure escalates.
    pub fn run<F>(f: F) -> Self
    where
        F: Fn(Payload, &Scope, &mut SweepContext) -> Result<(), StageError>
            + Send
            + Sync
            + 'static,
    {
        Self::Run { f: Arc::new(f), fail: None }
    }

    /// A run stage whose failures are delivered to `fail`.
    pub fn run_with_fail<F, H>(f: F, fail: H) -> Self
    where
        F: Fn(Payload, &Scope, &mut SweepContext) -> Result<(), StageError>
            + Send
            + Sync
            + 'static,
        H: Fn(StageError, &Scope, &mut SweepContext) + Send + Sync + 'static,
    {
        Self::Run {
            f: Arc::new(f),
            fail: Some(Arc::new(fail)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Emit { .. } => "emit",
            Self::Compute { .. } => "compute",
            Self::Filter { .. } => "filter",
            Self::Run { .. } => "run",
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// An ordered stage sequence. Pipelines are short; two stages cover the
/// common shapes.
pub type Pipeline = SmallVec<[Stage; 2]>;

/// Run `stages` sequentially on `value`, short-circuiting on the first
/// stop or failure.
pub(crate) fn run_pipeline(
    stages: &[Stage],
    value: Payload,
    scope: &Scope,
    ctx: &mut SweepContext,
) -> StageOutcome {
    let mut current = value;
    for stage in stages {
        match stage {
            Stage::Emit { name } => {
                tracing::trace!(target: "conflux::sweep", node = %name, "emit");
            }
            Stage::Compute { f } => match f(current, scope, ctx) {
                Ok(next) => current = next,
                Err(error) => return StageOutcome::Fail(error),
            },
            Stage::Filter { pred } => {
                if !pred(&current, scope, ctx) {
                    return StageOutcome::Stop;
                }
            }
            Stage::Run { f, fail } => {
                if let Err(error) = f(current.clone(), scope, ctx) {
                    match fail {
                        Some(handler) => {
                            handler(error, scope, ctx);
                            return StageOutcome::Stop;
                        }
                        None => return StageOutcome::Fail(error),
                    }
                }
            }
        }
    }
    StageOutcome::Continue(current)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    use smallvec::smallvec;

    use super::*;
    use crate::payload::{downcast, payload};
    use crate::registry::IdRegistry;

    fn ctx() -> SweepContext {
        SweepContext::new(IdRegistry::new().next())
    }

    #[test]
    fn emit_continues_unchanged() {
        let stages: Pipeline = smallvec![Stage::emit("node")];
        let out = run_pipeline(&stages, payload(5_i32), &Scope::empty(), &mut ctx());
        assert_eq!(downcast::<i32>(&out.continued().unwrap()), Some(5));
    }

    #[test]
    fn compute_transforms_the_value() {
        let stages: Pipeline = smallvec![Stage::compute(|value, _scope, _ctx| {
            let n = downcast::<i32>(&value).expect("i32 payload");
            Ok(payload(n * 2))
        })];
        let out = run_pipeline(&stages, payload(21_i32), &Scope::empty(), &mut ctx());
        assert_eq!(downcast::<i32>(&out.continued().unwrap()), Some(42));
    }

    #[test]
    fn compute_failure_is_captured() {
        let stages: Pipeline =
            smallvec![Stage::compute(|_value, _scope, _ctx| Err(StageError::new("bad input")))];
        let out = run_pipeline(&stages, payload(0_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Fail(error) if error.message() == "bad input"));
    }

    #[test]
    fn filter_stops_rejected_values() {
        let stages: Pipeline = smallvec![Stage::filter(|value, _scope, _ctx| {
            downcast::<i32>(value).is_some_and(|n| n > 10)
        })];
        let out = run_pipeline(&stages, payload(3_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Stop));

        let out = run_pipeline(&stages, payload(30_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Continue(_)));
    }

    #[test]
    fn filter_reads_its_predicate_from_scope() {
        let scope = Scope::builder().capture("threshold", 10_i32).build();
        let stages: Pipeline = smallvec![Stage::filter(|value, scope, _ctx| {
            let threshold = scope.get::<i32>("threshold").expect("threshold captured");
            downcast::<i32>(value).is_some_and(|n| n > *threshold)
        })];
        let out = run_pipeline(&stages, payload(11_i32), &scope, &mut ctx());
        assert!(matches!(out, StageOutcome::Continue(_)));
    }

    #[test]
    fn run_continues_with_the_value_unchanged() {
        let seen = std::sync::Arc::new(AtomicI32::new(0));
        let sink = seen.clone();
        let stages: Pipeline = smallvec![Stage::run(move |value, _scope, _ctx| {
            sink.store(downcast::<i32>(&value).expect("i32 payload"), Ordering::SeqCst);
            Ok(())
        })];
        let out = run_pipeline(&stages, payload(9_i32), &Scope::empty(), &mut ctx());
        assert_eq!(seen.load(Ordering::SeqCst), 9);
        assert_eq!(downcast::<i32>(&out.continued().unwrap()), Some(9));
    }

    #[test]
    fn run_failure_goes_to_the_declared_handler_and_stops() {
        let handled = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = handled.clone();
        let stages: Pipeline = smallvec![Stage::run_with_fail(
            |_value, _scope, _ctx| Err(StageError::new("boom")),
            move |error, _scope, _ctx| sink.lock().unwrap().push(error.message().to_string()),
        )];
        let out = run_pipeline(&stages, payload(0_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Stop));
        assert_eq!(*handled.lock().unwrap(), ["boom"]);
    }

    #[test]
    fn run_failure_without_handler_is_a_stage_failure() {
        let stages: Pipeline =
            smallvec![Stage::run(|_value, _scope, _ctx| Err(StageError::new("boom")))];
        let out = run_pipeline(&stages, payload(0_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Fail(_)));
    }

    #[test]
    fn pipeline_short_circuits_after_a_stop() {
        let ran = std::sync::Arc::new(AtomicI32::new(0));
        let sink = ran.clone();
        let stages: Pipeline = smallvec![
            Stage::filter(|_value, _scope, _ctx| false),
            Stage::run(move |_value, _scope, _ctx| {
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];
        let out = run_pipeline(&stages, payload(1_i32), &Scope::empty(), &mut ctx());
        assert!(matches!(out, StageOutcome::Stop));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
