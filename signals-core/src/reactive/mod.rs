//! Reactive Primitives
//!
//! This module implements the node kinds users work with: sources, computed
//! nodes and effects, plus the bridge that pushes their values to observers
//! outside the graph.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A [`Source`] is a container for mutable state. When it is read while a
//! computed node or effect is evaluating, the read is recorded as a
//! dependency. When its value changes, every dependent is notified.
//!
//! ## Computed
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of the values it read really changed, and only when someone
//! reads it.
//!
//! ## Effects
//!
//! An effect (held through a [`Watch`]) is a side-effecting computation that
//! runs whenever its dependencies change. Effects are what synchronize the
//! graph with the outside world.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered, not declared: the [`Runtime`] knows which node
//! is evaluating, and every read registers an edge against it. The edge
//! bookkeeping itself lives in [`crate::graph`].

mod computed;
mod context;
mod effect;
mod runtime;
mod source;
mod subscriber;

pub use computed::Computed;
pub use context::{BatchScope, WatcherScope};
pub use effect::{Cleanup, Watch};
pub use runtime::Runtime;
pub use source::Source;
pub use subscriber::{Observer, Subscription};

pub(crate) use effect::EffectNode;
