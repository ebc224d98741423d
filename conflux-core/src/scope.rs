//! Captured link scope.
//!
//! Every link owns one [`Scope`]: an immutable bag of named values fixed
//! at link construction and shared by every stage on that link. Combinators
//! put their captured pieces here under conventional keys (`"handler"`,
//! `"fail"`) instead of hiding them in closure environments, which keeps
//! stage functions pure functions of `(value, scope, context)`.
//!
//! Per-link *mutable* state, when genuinely needed, must be an explicit
//! cell (e.g. `Arc<Mutex<_>>`) stored as a scope entry — never stage-local
//! state.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

/// A value captured into a scope entry.
pub type ScopeValue = Arc<dyn Any + Send + Sync>;

/// Immutable, per-link bag of captured values.
///
/// Cloning shares the underlying entries; there is no way to mutate a
/// scope after [`ScopeBuilder::build`].
#[derive(Clone, Default)]
pub struct Scope {
    entries: Arc<IndexMap<&'static str, ScopeValue>>,
}

impl Scope {
    /// The shared empty scope, used for node-owned pipelines.
    pub fn empty() -> Scope {
        static EMPTY: OnceLock<Scope> = OnceLock::new();
        EMPTY.get_or_init(Scope::default).clone()
    }

    /// Start building a scope.
    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    /// Borrow the entry under `key` as `T`, if present and of that type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Whether an entry exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Names of the captured entries, in capture order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`Scope`].
#[derive(Default)]
pub struct ScopeBuilder {
    entries: IndexMap<&'static str, ScopeValue>,
}

impl ScopeBuilder {
    /// Capture `value` under `key`.
    pub fn capture<T: Send + Sync + 'static>(mut self, key: &'static str, value: T) -> Self {
        self.entries.insert(key, Arc::new(value) as ScopeValue);
        self
    }

    /// Finish the scope; no further mutation is possible.
    pub fn build(self) -> Scope {
        Scope {
            entries: Arc::new(self.entries),
        }
    }
}
