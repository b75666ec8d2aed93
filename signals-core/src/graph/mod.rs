//! Dependency Graph
//!
//! This module implements the substrate the reactive nodes are built on:
//! node and edge records, the chains that connect them, and the algorithms
//! that keep those chains in sync with what each node actually reads.
//!
//! # Overview
//!
//! - Nodes are sources, computed nodes or effects.
//! - An edge records that a target read a source, and at which version.
//!
//! Each edge sits in two chains at once: the source's observed-by chain (used
//! to push notifications down) and the target's depends-on chain (used to pull
//! and validate values up).
//!
//! # Design Decisions
//!
//! 1. Records live in generational arenas and point at each other by handle.
//!    Linking, unlinking and reordering are O(1) without aliasing `&mut`.
//!
//! 2. Edges are reused across passes through a per-source `listener` pointer,
//!    so steady-state re-evaluation allocates nothing.
//!
//! 3. Nothing in this module runs user code; the scheduler can be borrowed
//!    mutably for the whole of each operation.

mod arena;
mod chain;
mod lifecycle;
mod node;
mod scheduler;

pub use arena::{Arena, ArenaKey};
pub use chain::{Chain, Link, Side};
pub use node::{Edge, EdgeId, NodeId, NodeKind, NodeSlot, Refresh, Role, Run, Status};
pub use scheduler::Scheduler;
