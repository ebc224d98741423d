//! Hierarchical display names for diagnostics.
//!
//! A node's full display name is its short name qualified by the naming
//! context it was created in. The kernel only stores and forwards the
//! resulting string; it never parses it back.

use serde::Serialize;

/// A short name qualified by an optional parent naming context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeName {
    short_name: String,
    path: Vec<String>,
    full_name: String,
}

impl CompositeName {
    /// Build a composite name from a short name and an optional parent
    /// context.
    pub fn new(short_name: impl Into<String>, parent: Option<&CompositeName>) -> Self {
        let short_name = short_name.into();
        let mut path = match parent {
            Some(parent) => parent.path.clone(),
            None => Vec::new(),
        };
        path.push(short_name.clone());
        let full_name = path.join("/");
        Self {
            short_name,
            path,
            full_name,
        }
    }

    /// The unqualified name.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// The name segments from the outermost context inward.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The fully-qualified display name.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}
