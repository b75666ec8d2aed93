//! Signals Core
//!
//! This crate provides a fine-grained reactive dependency graph. It
//! implements:
//!
//! - Reactive primitives (sources, computed values, effects)
//! - Automatic dependency discovery at read time
//! - Lazy, glitch-free incremental re-evaluation
//! - Batched writes with generation-bounded effect flushing
//! - A push-style subscription bridge for observers outside the graph
//!
//! Everything is single-threaded. Handles are `!Send` and cheap to clone.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node and edge records, chains and the scheduler state
//! - `reactive`: the node kinds, the runtime and the subscription bridge
//! - `config`: per-graph settings
//! - `error`: the error types shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use signals_core::Graph;
//!
//! let graph = Graph::new();
//!
//! // Create a source
//! let count = graph.source(1);
//!
//! // Create a derived value
//! let doubled = graph.derive({
//!     let count = count.clone();
//!     move || Ok(count.get() * 2)
//! });
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _watch = graph
//!     .watch({
//!         let (count, doubled, log) = (count.clone(), doubled.clone(), Rc::clone(&log));
//!         move || {
//!             log.borrow_mut().push(format!("{} -> {}", count.get(), doubled.get()?));
//!             Ok(())
//!         }
//!     })
//!     .unwrap();
//!
//! // Update the source; the effect runs again
//! count.set(5).unwrap();
//! assert_eq!(*log.borrow(), vec!["1 -> 2", "5 -> 10"]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

use std::rc::Rc;

pub use config::GraphConfig;
pub use error::{Error, Failure, Fault, Result};
pub use graph::NodeId;
pub use reactive::{Cleanup, Computed, Observer, Runtime, Source, Subscription, Watch};

use reactive::EffectNode;

/// Entry point for building a reactive graph.
///
/// Every node created through one `Graph` shares its scheduler. Independent
/// graphs never interact. Cloning a `Graph` yields another handle to the
/// same one.
#[derive(Debug, Clone)]
pub struct Graph {
    runtime: Rc<Runtime>,
}

impl Graph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            runtime: Runtime::new(config),
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.runtime.config()
    }

    /// Create a mutable value.
    pub fn source<T>(&self, initial: T) -> Source<T>
    where
        T: PartialEq + Clone + 'static,
    {
        Source::new(&self.runtime, initial)
    }

    /// Create a lazily evaluated, memoized function of other nodes.
    ///
    /// `f` does not run until the result is first read.
    pub fn derive<T, F>(&self, f: F) -> Computed<T>
    where
        T: PartialEq + Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        Computed::new(&self.runtime, f)
    }

    /// Run `f` now and again whenever something it read changes.
    ///
    /// If the first run fails, the effect is disposed and the error is
    /// returned.
    pub fn watch<F>(&self, mut f: F) -> Result<Watch>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        let node = EffectNode::spawn(&self.runtime, Box::new(move || f().map(|()| None)))?;
        Ok(Watch::new(node))
    }

    /// Like [`watch`](Graph::watch), but each run returns a cleanup that is
    /// called before the next run and on disposal.
    pub fn watch_with_cleanup<F, C>(&self, mut f: F) -> Result<Watch>
    where
        F: FnMut() -> Result<C> + 'static,
        C: FnOnce() -> Result<()> + 'static,
    {
        let node = EffectNode::spawn(
            &self.runtime,
            Box::new(move || f().map(|cleanup| Some(Box::new(cleanup) as Cleanup))),
        )?;
        Ok(Watch::new(node))
    }

    /// Run `f` with writes deferred: effects flush once, after `f` returns.
    ///
    /// Nested batches flush only when the outermost one closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.runtime.batch(f)
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime.untracked(f)
    }

    /// Number of live node slots, disposed ones included.
    pub fn node_count(&self) -> usize {
        self.runtime.node_count()
    }

    /// Number of live dependency edges.
    pub fn edge_count(&self) -> usize {
        self.runtime.edge_count()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
