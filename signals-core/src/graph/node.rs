//! Graph Nodes
//!
//! This module defines the records that live in the dependency graph: node
//! slots, dependency edges, and the handles used to address them.

use std::fmt;
use std::rc::Weak;

use super::arena::ArenaKey;
use super::chain::{Chain, Link, Side};
use crate::error::Result;

/// Handle to a node slot in the scheduler's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    #[cfg(test)]
    pub(crate) fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl ArenaKey for NodeId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.generation)
    }
}

/// Handle to a dependency edge in the scheduler's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId {
    index: u32,
    generation: u32,
}

impl ArenaKey for EdgeId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn index(self) -> u32 {
        self.index
    }

    fn generation(self) -> u32 {
        self.generation
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A computed node. Both a source (others read it) and a target (it reads
    /// others). Caches its result.
    Computed,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents.
    Effect,
}

/// Bit set of node states.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    pub const NONE: Status = Status(0);
    /// The node's function is executing right now.
    pub const RUNNING: Status = Status(1 << 0);
    /// Already notified by the write being propagated.
    pub const NOTIFIED: Status = Status(1 << 1);
    /// Some upstream node may have changed since the last evaluation.
    pub const OUTDATED: Status = Status(1 << 2);
    /// Disposal was requested.
    pub const DISPOSED: Status = Status(1 << 3);
    /// Edges to this node's sources are linked into their observed-by chains.
    pub const TRACKING: Status = Status(1 << 4);

    pub fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }

    /// Keep only the bits set in `mask`.
    pub fn masked(self, mask: Status) -> Status {
        Status(self.0 & mask.0)
    }
}

impl std::ops::BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Status, &str); 5] = [
            (Status::RUNNING, "RUNNING"),
            (Status::NOTIFIED, "NOTIFIED"),
            (Status::OUTDATED, "OUTDATED"),
            (Status::DISPOSED, "DISPOSED"),
            (Status::TRACKING, "TRACKING"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Capability of a computed node: bring its cached result up to date.
pub trait Refresh {
    /// Returns `false` when the node is already running (a cycle).
    fn refresh(&self) -> bool;
}

/// Capability of an effect node: re-run and tear down.
pub trait Run {
    fn run(&self) -> Result<()>;
    fn dispose(&self) -> Result<()>;
}

/// Role-specific payload used to call back into the typed node.
pub enum Role {
    Source,
    Computed(Weak<dyn Refresh>),
    Effect(Weak<dyn Run>),
}

/// A node in the dependency graph.
pub struct NodeSlot {
    pub role: Role,

    pub status: Status,

    /// Output version; bumped only when the value (or failing) changes.
    pub version: u64,

    /// Global version at which a computed node was last validated.
    pub validated_at: u64,

    /// Edges to the nodes this node read during its last evaluation.
    pub sources: Chain,

    /// Edges from the nodes currently observing this one.
    pub targets: Chain,

    /// The edge belonging to whichever target is currently evaluating, if it
    /// read this node before. Saved and restored around each pass.
    pub listener: Option<EdgeId>,
}

impl NodeSlot {
    pub fn new(role: Role, status: Status) -> Self {
        Self {
            role,
            status,
            version: 0,
            validated_at: 0,
            sources: Chain::default(),
            targets: Chain::default(),
            listener: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.role {
            Role::Source => NodeKind::Source,
            Role::Computed(_) => NodeKind::Computed,
            Role::Effect(_) => NodeKind::Effect,
        }
    }
}

impl fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSlot")
            .field("kind", &self.kind())
            .field("status", &self.status)
            .field("version", &self.version)
            .finish()
    }
}

/// A dependency edge: `target` read `source`.
#[derive(Debug)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,

    /// Source version observed by the target's last read.
    pub version: u64,

    /// Reconfirmed during the current evaluation pass.
    pub in_use: bool,

    /// Linked into the source's observed-by chain.
    pub subscribed: bool,

    /// The source's listener before this edge's pass took it over.
    pub rollback: Option<EdgeId>,

    in_sources: Link,
    in_targets: Link,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            version: 0,
            in_use: true,
            subscribed: false,
            rollback: None,
            in_sources: Link::default(),
            in_targets: Link::default(),
        }
    }

    pub fn link(&self, side: Side) -> Link {
        match side {
            Side::Sources => self.in_sources,
            Side::Targets => self.in_targets,
        }
    }

    pub fn link_mut(&mut self, side: Side) -> &mut Link {
        match side {
            Side::Sources => &mut self.in_sources,
            Side::Targets => &mut self.in_targets,
        }
    }
}
