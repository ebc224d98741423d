//! Conflux Core
//!
//! This crate implements the kernel of the Conflux reactive dataflow
//! engine: a small graph of computation nodes connected by directed links,
//! through which discrete occurrences ("triggers") propagate synchronously,
//! transformed by per-edge stage pipelines.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `registry`: globally unique, monotonically increasing node ids
//! - `naming`: hierarchical display names for diagnostics
//! - `payload` / `scope`: type-erased occurrence values and the immutable
//!   captured state shared by the stages of one link
//! - `stage`: the stage library (emit, compute, filter, run) and the
//!   pipeline executor
//! - `graph`: nodes, links, and the scheduler driving one deterministic
//!   priority-ordered sweep per external trigger
//! - `event`: the typed, user-facing handles and their combinators
//!
//! # Example
//!
//! ```rust
//! use conflux_core::Event;
//!
//! let numbers = Event::<i32>::new("numbers");
//! let doubled = numbers.map(|n| n * 2);
//! let big = doubled.filter(|n| *n > 2);
//!
//! let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _sub = big.watch(move |n| sink.lock().unwrap().push(n));
//!
//! numbers.trigger(1).unwrap(); // doubled carries 2; 2 > 2 fails, dropped
//! numbers.trigger(2).unwrap(); // doubled carries 4; observed
//! assert_eq!(*seen.lock().unwrap(), vec![4]);
//! ```

pub mod error;
pub mod event;
pub mod graph;
pub mod naming;
pub mod payload;
pub mod registry;
pub mod scope;
pub mod stage;

pub use event::{Event, Observer, Subscription};
