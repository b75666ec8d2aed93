//! Edge Lifecycle
//!
//! Dependencies are rediscovered on every evaluation pass rather than declared.
//! A pass over a target looks like this:
//!
//! 1. [`backup`](Scheduler::backup): mark every existing edge unused and make
//!    it its source's `listener`, remembering the previous listener.
//! 2. The target's function runs. Each read calls
//!    [`add_dependency`](Scheduler::add_dependency), which finds the edge via
//!    the source's listener in O(1) and marks it used, or creates a new one.
//! 3. [`prune`](Scheduler::prune): edges still unused were not read this time
//!    and are released; every source gets its previous listener back.
//!
//! Because listeners are saved and restored in LIFO order, passes can nest
//! (a computed evaluated while an effect is running) without confusing whose
//! edge a read belongs to.
//!
//! A computed node only links its edges into its sources' observed-by chains
//! while something is observing it (`TRACKING`). Subscribing the first
//! observer cascades upwards and unsubscribing the last one cascades back, so
//! unobserved subgraphs hold no back-references and receive no notifications.

use super::chain::Side;
use super::node::{Edge, EdgeId, NodeId, NodeKind, Status};
use super::scheduler::Scheduler;

impl Scheduler {
    /// Register that the current watcher read `source`.
    ///
    /// Returns the edge whose version snapshot the caller must sync, or
    /// `None` when nothing is evaluating, when `source` is disposed, or when
    /// the edge was already confirmed earlier in this pass.
    pub fn add_dependency(&mut self, source: NodeId) -> Option<EdgeId> {
        let watcher = self.watcher?;
        let slot = self.nodes.get(source)?;
        if slot.status.contains(Status::DISPOSED) {
            return None;
        }

        let existing = slot
            .listener
            .filter(|&edge| self.edges.get(edge).is_some_and(|edge| edge.target == watcher));

        if let Some(edge) = existing {
            if self.edges[edge].in_use {
                return None;
            }
            self.edges[edge].in_use = true;

            let Scheduler { nodes, edges, .. } = self;
            nodes[watcher].sources.move_to_back(edges, Side::Sources, edge);

            let tracking = nodes[watcher].status.contains(Status::TRACKING);
            if tracking && edges[edge].subscribed {
                nodes[source].targets.move_to_front(edges, Side::Targets, edge);
            }
            return Some(edge);
        }

        let mut record = Edge::new(source, watcher);
        record.rollback = slot.listener;

        let Scheduler { nodes, edges, .. } = self;
        let edge = edges.insert(record);
        nodes[watcher].sources.push_back(edges, Side::Sources, edge);
        nodes[source].listener = Some(edge);
        tracing::trace!(%source, target = %watcher, "dependency edge created");

        if nodes[watcher].status.contains(Status::TRACKING) {
            self.subscribe(edge);
        }
        Some(edge)
    }

    /// Link `edge` into its source's observed-by chain.
    pub fn subscribe(&mut self, edge: EdgeId) {
        if self.edges[edge].subscribed {
            return;
        }
        let source = self.edges[edge].source;

        let slot = &mut self.nodes[source];
        if slot.kind() == NodeKind::Computed && slot.targets.is_empty() {
            slot.status.insert(Status::OUTDATED | Status::TRACKING);
            for upstream in slot.sources.collect(&self.edges, Side::Sources) {
                self.subscribe(upstream);
            }
        }

        let Scheduler { nodes, edges, .. } = self;
        nodes[source].targets.push_front(edges, Side::Targets, edge);
        edges[edge].subscribed = true;
    }

    /// Unlink `edge` from its source's observed-by chain.
    pub fn unsubscribe(&mut self, edge: EdgeId) {
        if !self.edges[edge].subscribed {
            return;
        }
        let source = self.edges[edge].source;

        let Scheduler { nodes, edges, .. } = self;
        edges[edge].subscribed = false;
        let Some(slot) = nodes.get_mut(source) else {
            return;
        };
        slot.targets.unlink(edges, Side::Targets, edge);

        if slot.kind() == NodeKind::Computed && slot.targets.is_empty() {
            slot.status.remove(Status::TRACKING);
            for upstream in slot.sources.collect(edges, Side::Sources) {
                self.unsubscribe(upstream);
            }
        }
    }

    /// Prepare `target`'s edges for a new evaluation pass.
    pub fn backup(&mut self, target: NodeId) {
        let Scheduler { nodes, edges, .. } = self;
        let mut cursor = nodes[target].sources.first;

        while let Some(edge) = cursor {
            let source = edges[edge].source;
            let source_slot = &mut nodes[source];

            edges[edge].rollback = source_slot.listener.replace(edge);
            edges[edge].in_use = false;

            cursor = edges[edge].link(Side::Sources).next;
        }
    }

    /// Drop the edges `target` did not read in the pass that just ended and
    /// restore every source's previous listener.
    pub fn prune(&mut self, target: NodeId) {
        let mut cursor = self.nodes[target].sources.last;

        while let Some(edge) = cursor {
            cursor = self.edges[edge].link(Side::Sources).prev;

            let source = self.edges[edge].source;
            let rollback = self.edges[edge].rollback.take();
            let source_slot = self
                .nodes
                .get_mut(source)
                .expect("dependency graph corrupted: edge outlived its source");
            let listener = source_slot
                .listener
                .expect("dependency graph corrupted: source is missing its listener");
            debug_assert_eq!(listener, edge, "listener does not belong to the pruned pass");
            source_slot.listener = rollback;

            if !self.edges[edge].in_use {
                self.unsubscribe(edge);
                self.release_edge(edge);
            }
        }
    }

    /// Unsubscribe and release every edge `target` depends on.
    pub fn teardown_sources(&mut self, target: NodeId) {
        let Some(slot) = self.nodes.get(target) else {
            return;
        };
        for edge in slot.sources.collect(&self.edges, Side::Sources) {
            self.unsubscribe(edge);
            self.release_edge(edge);
        }
    }

    /// Detach `edge` from its target's depends-on chain and free it. The edge
    /// must already be unsubscribed.
    pub fn release_edge(&mut self, edge: EdgeId) {
        let Scheduler { nodes, edges, .. } = self;
        let Edge {
            source,
            target,
            rollback,
            ..
        } = edges[edge];

        if let Some(target_slot) = nodes.get_mut(target) {
            target_slot.sources.unlink(edges, Side::Sources, edge);
        }
        if let Some(source_slot) = nodes.get_mut(source) {
            if source_slot.listener == Some(edge) {
                source_slot.listener = rollback;
            }
        }
        edges.remove(edge);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Weak;

    use super::*;
    use crate::graph::node::{Refresh, Role, Run};

    struct Inert;

    impl Refresh for Inert {
        fn refresh(&self) -> bool {
            true
        }
    }

    impl Run for Inert {
        fn run(&self) -> crate::Result<()> {
            Ok(())
        }

        fn dispose(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn effect(scheduler: &mut Scheduler) -> NodeId {
        let dead: Weak<Inert> = Weak::new();
        scheduler.add_node(Role::Effect(dead))
    }

    fn computed(scheduler: &mut Scheduler) -> NodeId {
        let dead: Weak<Inert> = Weak::new();
        scheduler.add_node(Role::Computed(dead))
    }

    /// Run one evaluation pass of `target` that reads `reads` in order.
    fn pass(scheduler: &mut Scheduler, target: NodeId, reads: &[NodeId]) {
        scheduler.backup(target);
        let previous = scheduler.watcher.replace(target);
        for &source in reads {
            if let Some(edge) = scheduler.add_dependency(source) {
                let version = scheduler.version(source);
                scheduler.edges[edge].version = version;
            }
        }
        scheduler.watcher = previous;
        scheduler.prune(target);
    }

    #[test]
    fn no_watcher_registers_nothing() {
        let mut scheduler = Scheduler::new();
        let source = scheduler.add_node(Role::Source);
        assert_eq!(scheduler.add_dependency(source), None);
        assert_eq!(scheduler.edge_count(), 0);
    }

    #[test]
    fn repeated_reads_share_one_edge() {
        let mut scheduler = Scheduler::new();
        let source = scheduler.add_node(Role::Source);
        let effect = effect(&mut scheduler);

        pass(&mut scheduler, effect, &[source, source, source]);
        assert_eq!(scheduler.edge_count(), 1);

        pass(&mut scheduler, effect, &[source]);
        assert_eq!(scheduler.edge_count(), 1);
        assert_eq!(scheduler.observers(source), vec![effect]);
    }

    #[test]
    fn unread_edges_are_pruned() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.add_node(Role::Source);
        let b = scheduler.add_node(Role::Source);
        let effect = effect(&mut scheduler);

        pass(&mut scheduler, effect, &[a, b]);
        assert_eq!(scheduler.dependencies(effect), vec![a, b]);

        pass(&mut scheduler, effect, &[b]);
        assert_eq!(scheduler.dependencies(effect), vec![b]);
        assert!(scheduler.observers(a).is_empty());
        assert_eq!(scheduler.edge_count(), 1);
    }

    #[test]
    fn depends_on_chain_follows_read_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.add_node(Role::Source);
        let b = scheduler.add_node(Role::Source);
        let effect = effect(&mut scheduler);

        pass(&mut scheduler, effect, &[a, b]);
        pass(&mut scheduler, effect, &[b, a]);
        assert_eq!(scheduler.dependencies(effect), vec![b, a]);
    }

    #[test]
    fn reconfirmed_edge_moves_to_head_of_observers() {
        let mut scheduler = Scheduler::new();
        let source = scheduler.add_node(Role::Source);
        let first = effect(&mut scheduler);
        let second = effect(&mut scheduler);

        pass(&mut scheduler, first, &[source]);
        pass(&mut scheduler, second, &[source]);
        assert_eq!(scheduler.observers(source), vec![second, first]);

        pass(&mut scheduler, first, &[source]);
        assert_eq!(scheduler.observers(source), vec![first, second]);
    }

    #[test]
    fn listeners_are_restored_after_nested_passes() {
        let mut scheduler = Scheduler::new();
        let source = scheduler.add_node(Role::Source);
        let outer = effect(&mut scheduler);
        let inner = computed(&mut scheduler);

        // Outer reads the source, then (nested) inner reads it too.
        scheduler.backup(outer);
        scheduler.watcher = Some(outer);
        let outer_edge = scheduler.add_dependency(source);
        assert!(outer_edge.is_some());

        scheduler.backup(inner);
        scheduler.watcher = Some(inner);
        let inner_edge = scheduler.add_dependency(source);
        assert_ne!(inner_edge, outer_edge);
        scheduler.watcher = Some(outer);
        scheduler.prune(inner);

        assert_eq!(scheduler.get_node(source).unwrap().listener, outer_edge);

        // A second read by the outer pass reuses its edge.
        assert_eq!(scheduler.add_dependency(source), None);
        scheduler.watcher = None;
        scheduler.prune(outer);

        assert_eq!(scheduler.get_node(source).unwrap().listener, None);
        assert_eq!(scheduler.edge_count(), 2);
    }

    #[test]
    fn computed_tracks_only_while_observed() {
        let mut scheduler = Scheduler::new();
        let source = scheduler.add_node(Role::Source);
        let derived = computed(&mut scheduler);
        let effect = effect(&mut scheduler);

        pass(&mut scheduler, derived, &[source]);
        assert!(scheduler.observers(source).is_empty());

        pass(&mut scheduler, effect, &[derived]);
        assert!(scheduler.status(derived).contains(Status::TRACKING));
        assert_eq!(scheduler.observers(source), vec![derived]);

        pass(&mut scheduler, effect, &[]);
        assert!(!scheduler.status(derived).contains(Status::TRACKING));
        assert!(scheduler.observers(source).is_empty());
    }

    #[test]
    fn teardown_releases_everything() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.add_node(Role::Source);
        let b = scheduler.add_node(Role::Source);
        let effect = effect(&mut scheduler);

        pass(&mut scheduler, effect, &[a, b]);
        scheduler.teardown_sources(effect);

        assert_eq!(scheduler.edge_count(), 0);
        assert!(scheduler.observers(a).is_empty());
        assert!(scheduler.observers(b).is_empty());
    }
}
