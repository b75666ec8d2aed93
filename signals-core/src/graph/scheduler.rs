//! Scheduler State
//!
//! The scheduler owns everything that describes one reactive graph: the node
//! and edge arenas, the global version counter, the node currently evaluating
//! (the *watcher*), the queue of effects waiting to run, and the batch depth.
//!
//! It never calls user code. Anything that has to run a compute function or
//! an effect callback lives in [`Runtime`](crate::reactive::Runtime), which
//! borrows the scheduler only between those calls.
//!
//! # Notification
//!
//! Writing a source pushes a notification down its observed-by chain:
//!
//! 1. Computed targets are flagged `OUTDATED | NOTIFIED` and forward the
//!    notification to their own targets.
//! 2. Effect targets are flagged `NOTIFIED` and queued.
//! 3. A node already flagged `NOTIFIED` is skipped, so a diamond reaches each
//!    node once.
//!
//! Nothing is recomputed here. Whether a notified node really has to run is
//! decided later, when it is pulled.

use smallvec::SmallVec;

use super::arena::Arena;
use super::chain::Side;
use super::node::{Edge, EdgeId, NodeId, NodeKind, NodeSlot, Role, Status};

/// Per-graph scheduling state.
#[derive(Debug)]
pub struct Scheduler {
    pub(crate) nodes: Arena<NodeId, NodeSlot>,
    pub(crate) edges: Arena<EdgeId, Edge>,

    /// Incremented on every source change anywhere in the graph.
    pub global_version: u64,

    /// The node whose function is currently executing.
    pub watcher: Option<NodeId>,

    /// Effects notified since the last flush, in notification order.
    pub pending: SmallVec<[NodeId; 8]>,

    pub batch_depth: u32,

    /// Computed functions currently on the call stack. Unlike `watcher`,
    /// this is not hidden by an untracked scope.
    pub evaluating: u32,

    /// Generations drained by the flush in progress.
    pub generation: u32,
}

impl Scheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            edges: Arena::new(),
            global_version: 0,
            watcher: None,
            pending: SmallVec::new(),
            batch_depth: 0,
            evaluating: 0,
            generation: 0,
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, role: Role) -> NodeId {
        let status = match role {
            Role::Source => Status::NONE,
            Role::Computed(_) => Status::OUTDATED,
            Role::Effect(_) => Status::TRACKING,
        };
        let mut slot = NodeSlot::new(role, status);
        // A fresh computed must not look validated at the current version.
        slot.validated_at = self.global_version.wrapping_sub(1);
        self.nodes.insert(slot)
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. Edges from unobserved
    /// computed targets are not linked into the node's observed-by chain, so
    /// the edge arena is scanned for them.
    pub fn remove_node(&mut self, id: NodeId) {
        if !self.nodes.contains(id) {
            return;
        }

        self.teardown_sources(id);

        let outgoing: SmallVec<[EdgeId; 8]> = self
            .edges
            .iter()
            .filter(|(_, edge)| edge.source == id)
            .map(|(edge, _)| edge)
            .collect();
        for edge in outgoing {
            self.edges[edge].subscribed = false;
            self.release_edge(edge);
        }

        self.pending.retain(|pending| *pending != id);
        self.nodes.remove(id);
    }

    /// Flag a node disposed and cut it out of the graph while keeping its
    /// slot, so later reads can tell it was disposed.
    ///
    /// Observer edges are released right away. The node's own edges are
    /// released too unless it is running; then the end of its pass does it.
    /// Returns whether the node's own edges were released.
    pub fn dispose_node(&mut self, id: NodeId) -> bool {
        let Some(slot) = self.nodes.get_mut(id) else {
            return true;
        };
        slot.status.insert(Status::DISPOSED);
        slot.status.remove(Status::NOTIFIED | Status::OUTDATED);
        let running = slot.status.contains(Status::RUNNING);

        for edge in slot.targets.collect(&self.edges, Side::Targets) {
            self.unsubscribe(edge);
            self.release_edge(edge);
        }
        self.pending.retain(|pending| *pending != id);

        if running {
            return false;
        }
        self.teardown_sources(id);
        true
    }

    /// Get a reference to a node.
    pub fn get_node(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes.get(id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes.get_mut(id)
    }

    pub fn status(&self, id: NodeId) -> Status {
        self.nodes.get(id).map_or(Status::DISPOSED, |slot| slot.status)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(NodeSlot::kind)
    }

    pub fn version(&self, id: NodeId) -> u64 {
        self.nodes.get(id).map_or(0, |slot| slot.version)
    }

    /// Record an output change of `id`.
    pub fn bump_version(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.version += 1;
        }
    }

    /// Record a source write anywhere in the graph.
    pub fn bump_global_version(&mut self) {
        self.global_version = self.global_version.wrapping_add(1);
    }

    /// Mark every target reachable from `source` and queue affected effects.
    pub fn notify_targets(&mut self, source: NodeId) {
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::new();
        self.push_targets(source, &mut stack);

        while let Some(id) = stack.pop() {
            let Some(slot) = self.nodes.get_mut(id) else {
                continue;
            };
            if slot.status.contains(Status::NOTIFIED) {
                continue;
            }

            match slot.kind() {
                NodeKind::Computed => {
                    slot.status.insert(Status::OUTDATED | Status::NOTIFIED);
                    self.push_targets(id, &mut stack);
                }
                NodeKind::Effect => {
                    slot.status.insert(Status::NOTIFIED);
                    self.pending.push(id);
                }
                NodeKind::Source => {}
            }
        }
    }

    /// Push the observers of `id` so that the head of the chain pops first.
    fn push_targets(&self, id: NodeId, stack: &mut SmallVec<[NodeId; 16]>) {
        let Some(slot) = self.nodes.get(id) else {
            return;
        };
        let start = stack.len();
        let mut cursor = slot.targets.first;
        while let Some(edge) = cursor {
            let edge = &self.edges[edge];
            stack.push(edge.target);
            cursor = edge.link(Side::Targets).next;
        }
        stack[start..].reverse();
    }

    /// Snapshot and clear the pending queue.
    pub fn take_pending(&mut self) -> SmallVec<[NodeId; 8]> {
        std::mem::take(&mut self.pending)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the total number of live dependency edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Targets currently linked into `id`'s observed-by chain, head first.
    pub fn observers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.get(id).map_or_else(Vec::new, |slot| {
            slot.targets
                .collect(&self.edges, Side::Targets)
                .into_iter()
                .map(|edge| self.edges[edge].target)
                .collect()
        })
    }

    /// Sources in `id`'s depends-on chain, in read order.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.get(id).map_or_else(Vec::new, |slot| {
            slot.sources
                .collect(&self.edges, Side::Sources)
                .into_iter()
                .map(|edge| self.edges[edge].source)
                .collect()
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
