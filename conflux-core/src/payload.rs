//! Occurrence payloads.
//!
//! Stage pipelines are untyped at the kernel level: a payload is a
//! reference-counted, type-erased value that typed handles wrap and unwrap
//! at the boundary. [`Absent`] is the marker a partial transform produces
//! for a value it drops, so "compute, then filter out the misses" stays
//! two single-purpose stages instead of one stage with fallback semantics
//! baked in.

use std::any::Any;
use std::sync::Arc;

/// A type-erased occurrence value carried through a sweep.
///
/// Cloning a payload is cheap; fan-out hands every child the same shared
/// value.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Wrap a value into a [`Payload`].
pub fn payload<T: Send + Sync + 'static>(value: T) -> Payload {
    Arc::new(value)
}

/// Borrow the payload as `T`, if it holds one.
pub fn downcast_ref<T: Send + Sync + 'static>(payload: &Payload) -> Option<&T> {
    payload.downcast_ref::<T>()
}

/// Clone the payload out as `T`, if it holds one.
pub fn downcast<T: Clone + Send + Sync + 'static>(payload: &Payload) -> Option<T> {
    payload.downcast_ref::<T>().cloned()
}

/// Marker produced by a partial transform for a value it drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Absent;

/// Whether the payload is the [`Absent`] marker.
pub fn is_absent(payload: &Payload) -> bool {
    payload.is::<Absent>()
}
