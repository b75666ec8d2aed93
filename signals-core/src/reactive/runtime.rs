//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources, computed
//! nodes and effects. There is one per [`Graph`](crate::Graph); every node
//! holds an `Rc` to it, and independent graphs never share state.
//!
//! # How It Works
//!
//! 1. When a node is created, it registers a slot with the scheduler.
//!
//! 2. When a node's function reads another node, the runtime records the
//!    dependency edge against the current watcher.
//!
//! 3. When a source changes, the runtime:
//!    a. Bumps the source's version and the global version
//!    b. Flags every dependent computed node as outdated
//!    c. Queues every dependent effect
//!    d. Flushes the queue when the outermost batch closes
//!
//! 4. Computed nodes are lazy. An effect that runs pulls them, and each one
//!    recomputes only if one of its own inputs really changed version.
//!
//! # Borrowing
//!
//! The scheduler sits in a `RefCell`. It is borrowed for short, self-contained
//! steps and never while user code runs, so a compute function or effect can
//! read, write, create and dispose nodes freely.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::GraphConfig;
use crate::error::{Error, Fault, Result};
use crate::graph::{EdgeId, NodeId, NodeKind, Role, Scheduler, Side, Status};

use super::context::{BatchScope, EvaluationScope, WatcherScope};

/// Outcome of checking whether a computed node's cache can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    /// The node is already running: reading it now is a cycle.
    Cycle,
    /// The cached result is current.
    Fresh,
    /// The node must re-evaluate. It is left flagged `RUNNING`.
    Stale,
}

/// The per-graph reactive runtime.
#[derive(Debug)]
pub struct Runtime {
    config: GraphConfig,
    scheduler: RefCell<Scheduler>,
}

impl Runtime {
    pub fn new(config: GraphConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            scheduler: RefCell::new(Scheduler::new()),
        })
    }

    pub fn config(&self) -> GraphConfig {
        self.config
    }

    /// Run `f` with the scheduler borrowed mutably.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut self.scheduler.borrow_mut())
    }

    /// Register a node slot with the runtime.
    pub(crate) fn register(&self, role: Role) -> NodeId {
        self.with(|scheduler| scheduler.add_node(role))
    }

    /// Unregister a node, removing every edge that involves it.
    pub(crate) fn unregister(&self, id: NodeId) {
        // Nodes can be dropped while the scheduler is mid-operation only if
        // something went badly wrong already; don't double panic.
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.remove_node(id);
        }
    }

    pub(crate) fn status(&self, id: NodeId) -> Status {
        self.with(|scheduler| scheduler.status(id))
    }

    /// Get the node currently being evaluated, if any.
    pub fn current_watcher(&self) -> Option<NodeId> {
        self.with(|scheduler| scheduler.watcher)
    }

    /// Check if we're inside an evaluation that records dependencies.
    pub fn is_tracking(&self) -> bool {
        self.current_watcher().is_some()
    }

    pub fn batch_depth(&self) -> u32 {
        self.with(|scheduler| scheduler.batch_depth)
    }

    pub fn node_count(&self) -> usize {
        self.with(|scheduler| scheduler.node_count())
    }

    pub fn edge_count(&self) -> usize {
        self.with(|scheduler| scheduler.edge_count())
    }

    /// Record a read of `source` by the current watcher.
    ///
    /// Returns the edge whose snapshot should be synced once the source's
    /// value is known.
    pub(crate) fn add_dependency(&self, source: NodeId) -> Option<EdgeId> {
        self.with(|scheduler| scheduler.add_dependency(source))
    }

    /// Stamp `edge` with the current version of `source`.
    pub(crate) fn sync_edge(&self, edge: EdgeId, source: NodeId) {
        self.with(|scheduler| {
            let version = scheduler.version(source);
            if let Some(edge) = scheduler.edges.get_mut(edge) {
                edge.version = version;
            }
        });
    }

    /// Record a read of a source node, whose version is already final.
    pub(crate) fn track(&self, source: NodeId) {
        if let Some(edge) = self.add_dependency(source) {
            self.sync_edge(edge, source);
        }
    }

    /// Install `watcher` until the returned guard is dropped.
    pub(crate) fn exchange_watcher(&self, watcher: Option<NodeId>) -> WatcherScope<'_> {
        WatcherScope::enter(self, watcher)
    }

    /// Run a computed node's function as `id` until the guard is dropped.
    pub(crate) fn evaluate(&self, id: NodeId) -> EvaluationScope<'_> {
        EvaluationScope::enter(self, id)
    }

    /// Reject writes from inside a computed node's evaluation, including
    /// untracked sections of it.
    pub(crate) fn check_write(&self) -> Result<()> {
        let evaluating_computed = self.with(|scheduler| {
            scheduler.evaluating > 0
                || scheduler
                    .watcher
                    .and_then(|watcher| scheduler.kind(watcher))
                    .is_some_and(|kind| kind == NodeKind::Computed)
        });
        if evaluating_computed {
            return Err(Fault::IllegalMutation.into());
        }
        Ok(())
    }

    /// Publish a change of `source`: bump versions, notify dependents, and
    /// flush effects unless an enclosing batch is open.
    pub(crate) fn notify_change(&self, source: NodeId) -> Result<()> {
        let batch = self.start_batch();
        self.with(|scheduler| {
            scheduler.bump_version(source);
            scheduler.bump_global_version();
            scheduler.notify_targets(source);
        });
        batch.finish()
    }

    /// Whether any source `target` read since its last evaluation now has a
    /// different version. Upstream computed nodes are refreshed on the way,
    /// and the walk stops at the first confirmed change.
    pub(crate) fn needs_to_recompute(&self, target: NodeId) -> bool {
        let mut cursor = self.with(|scheduler| {
            scheduler
                .get_node(target)
                .and_then(|slot| slot.sources.first)
        });

        while let Some(edge) = cursor {
            let Some((source, snapshot)) = self.with(|scheduler| {
                scheduler
                    .edges
                    .get(edge)
                    .map(|edge| (edge.source, edge.version))
            }) else {
                return true;
            };

            let version = |runtime: &Runtime| runtime.with(|scheduler| scheduler.version(source));
            if version(self) != snapshot || !self.refresh_node(source) || version(self) != snapshot {
                return true;
            }

            cursor = match self.with(|scheduler| {
                scheduler
                    .edges
                    .get(edge)
                    .map(|edge| edge.link(Side::Sources).next)
            }) {
                Some(next) => next,
                None => return true,
            };
        }

        false
    }

    /// Bring `id` up to date if it is a computed node. Returns `false` on a
    /// cycle.
    fn refresh_node(&self, id: NodeId) -> bool {
        let computed = self.with(|scheduler| match scheduler.get_node(id).map(|slot| &slot.role) {
            Some(Role::Computed(node)) => node.upgrade(),
            _ => None,
        });
        computed.map_or(true, |node| node.refresh())
    }

    /// First half of a computed node's refresh: decide whether the cached
    /// result can be reused.
    pub(crate) fn begin_refresh(&self, id: NodeId) -> Freshness {
        let needs_check = self.with(|scheduler| {
            let global_version = scheduler.global_version;
            let Some(slot) = scheduler.get_node_mut(id) else {
                return Err(Freshness::Fresh);
            };

            slot.status.remove(Status::NOTIFIED);
            if slot.status.contains(Status::RUNNING) {
                return Err(Freshness::Cycle);
            }

            // Observed and not notified since the last evaluation.
            if slot.status.masked(Status::OUTDATED | Status::TRACKING) == Status::TRACKING {
                return Err(Freshness::Fresh);
            }
            slot.status.remove(Status::OUTDATED);

            // Nothing was written anywhere since the last check.
            if slot.validated_at == global_version {
                return Err(Freshness::Fresh);
            }
            slot.validated_at = global_version;

            slot.status.insert(Status::RUNNING);
            Ok(slot.version > 0)
        });

        match needs_check {
            Err(freshness) => freshness,
            Ok(false) => Freshness::Stale,
            Ok(true) => {
                if self.needs_to_recompute(id) {
                    Freshness::Stale
                } else {
                    self.finish_running(id);
                    Freshness::Fresh
                }
            }
        }
    }

    /// Prune the pass that just ended and clear `RUNNING`. If disposal was
    /// requested while the node ran, its edges are torn down now and `true`
    /// is returned.
    pub(crate) fn end_pass(&self, id: NodeId, changed: bool) -> bool {
        self.with(|scheduler| {
            if !scheduler.nodes.contains(id) {
                return true;
            }
            if changed {
                scheduler.bump_version(id);
            }
            scheduler.prune(id);
            let slot = &mut scheduler.nodes[id];
            slot.status.remove(Status::RUNNING);
            let disposed = slot.status.contains(Status::DISPOSED);
            if disposed {
                scheduler.teardown_sources(id);
            }
            disposed
        })
    }

    /// Mark `id` disposed and detach it from the graph. Returns `false` when
    /// the node is mid-run and its own edges are left for
    /// [`end_pass`](Runtime::end_pass).
    pub(crate) fn dispose_node(&self, id: NodeId) -> bool {
        self.with(|scheduler| scheduler.dispose_node(id))
    }

    fn finish_running(&self, id: NodeId) {
        self.with(|scheduler| {
            if let Some(slot) = scheduler.get_node_mut(id) {
                slot.status.remove(Status::RUNNING);
            }
        });
    }

    /// Open a batch.
    pub(crate) fn start_batch(&self) -> BatchScope<'_> {
        BatchScope::enter(self)
    }

    /// Close a batch level. At the outermost level, drain pending effects.
    pub(crate) fn end_batch(&self) -> Result<()> {
        let outermost = self.with(|scheduler| {
            if scheduler.batch_depth > 1 {
                scheduler.batch_depth -= 1;
                false
            } else {
                true
            }
        });
        if !outermost {
            return Ok(());
        }

        let result = self.flush();
        self.with(|scheduler| {
            scheduler.generation = 0;
            scheduler.batch_depth = scheduler.batch_depth.saturating_sub(1);
        });
        result
    }

    /// Drain the pending queue one generation at a time.
    ///
    /// Effects queued while a generation runs form the next generation. A
    /// failing effect is disposed and the first failure is returned after the
    /// queue is empty.
    fn flush(&self) -> Result<()> {
        let mut first_error: Option<Error> = None;

        loop {
            let (queue, generation) = self.with(|scheduler| {
                let queue = scheduler.take_pending();
                if !queue.is_empty() {
                    scheduler.generation += 1;
                }
                (queue, scheduler.generation)
            });
            if queue.is_empty() {
                break;
            }

            if generation > self.config.max_generations {
                tracing::warn!(
                    generation,
                    effects = queue.len(),
                    "effects keep rescheduling each other, aborting flush"
                );
                self.abort(&queue);
                return Err(Fault::Cycle.into());
            }

            tracing::debug!(generation, effects = queue.len(), "flushing effects");

            for id in queue {
                let effect = self.with(|scheduler| match scheduler.get_node(id).map(|slot| &slot.role) {
                    Some(Role::Effect(effect)) => effect.upgrade(),
                    _ => None,
                });
                let Some(effect) = effect else {
                    continue;
                };

                if let Err(error) = effect.run() {
                    tracing::debug!(%id, %error, "effect failed, disposing it");
                    if let Err(cleanup_error) = effect.dispose() {
                        tracing::warn!(%id, error = %cleanup_error, "cleanup of failed effect also failed");
                    }
                    first_error.get_or_insert(error);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Dispose every effect of an aborted generation, plus anything their
    /// cleanups queued.
    fn abort(&self, queue: &[NodeId]) {
        let mut queue = queue.to_vec();
        while !queue.is_empty() {
            for id in queue.drain(..) {
                let effect = self.with(|scheduler| {
                    let slot = scheduler.get_node_mut(id)?;
                    slot.status.remove(Status::NOTIFIED);
                    match &slot.role {
                        Role::Effect(effect) => effect.upgrade(),
                        _ => None,
                    }
                });
                if let Some(effect) = effect {
                    if let Err(error) = effect.dispose() {
                        tracing::warn!(%id, %error, "cleanup failed while aborting a cyclic flush");
                    }
                }
            }
            queue.extend(self.with(|scheduler| scheduler.take_pending()));
        }
    }

    /// Run `f` inside a batch; effects flush once when it returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let batch = self.start_batch();
        let out = f();
        batch.finish()?;
        Ok(out)
    }

    /// Run `f` with no watcher, so reads inside it register no dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.exchange_watcher(None);
        f()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Weak;

    use super::*;
    use crate::graph::{Refresh, Run};

    /// An effect stand-in that counts runs.
    struct CountingRun {
        runs: Cell<usize>,
        disposed: Cell<bool>,
    }

    impl Run for CountingRun {
        fn run(&self) -> Result<()> {
            self.runs.set(self.runs.get() + 1);
            Ok(())
        }

        fn dispose(&self) -> Result<()> {
            self.disposed.set(true);
            Ok(())
        }
    }

    struct Never;

    impl Refresh for Never {
        fn refresh(&self) -> bool {
            true
        }
    }

    fn counting() -> Rc<CountingRun> {
        Rc::new(CountingRun {
            runs: Cell::new(0),
            disposed: Cell::new(false),
        })
    }

    fn wire(runtime: &Runtime, target: NodeId, source: NodeId) {
        runtime.with(|scheduler| scheduler.backup(target));
        {
            let _scope = runtime.exchange_watcher(Some(target));
            runtime.track(source);
        }
        runtime.end_pass(target, false);
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let runtime = Runtime::new(GraphConfig::default());
        let id = runtime.register(Role::Source);
        assert_eq!(runtime.node_count(), 1);

        runtime.unregister(id);
        assert_eq!(runtime.node_count(), 0);
        assert_eq!(runtime.status(id), Status::DISPOSED);
    }

    #[test]
    fn runtime_flushes_notified_effects() {
        let runtime = Runtime::new(GraphConfig::default());
        let source = runtime.register(Role::Source);
        let effect = counting();
        let weak: Weak<dyn Run> = Rc::downgrade(&effect) as Weak<dyn Run>;
        let target = runtime.register(Role::Effect(weak));
        wire(&runtime, target, source);

        // Inside a batch nothing runs until the batch closes.
        runtime
            .batch(|| {
                runtime.notify_change(source).unwrap();
                assert_eq!(effect.runs.get(), 0);
            })
            .unwrap();
        assert_eq!(effect.runs.get(), 1);
        assert_eq!(runtime.batch_depth(), 0);
    }

    #[test]
    fn edge_snapshot_tracks_source_version() {
        let runtime = Runtime::new(GraphConfig::default());
        let source = runtime.register(Role::Source);
        let never: Weak<dyn Refresh> = Weak::<Never>::new();
        let target = runtime.register(Role::Computed(never));
        wire(&runtime, target, source);

        assert!(!runtime.needs_to_recompute(target));

        runtime.notify_change(source).unwrap();
        assert!(runtime.needs_to_recompute(target));

        wire(&runtime, target, source);
        assert!(!runtime.needs_to_recompute(target));
    }

    #[test]
    fn writes_from_computed_evaluation_are_rejected() {
        let runtime = Runtime::new(GraphConfig::default());
        let never: Weak<dyn Refresh> = Weak::<Never>::new();
        let computed = runtime.register(Role::Computed(never));
        let effect: Weak<dyn Run> = Weak::<CountingRun>::new();
        let effect = runtime.register(Role::Effect(effect));

        assert!(runtime.check_write().is_ok());
        {
            let _scope = runtime.exchange_watcher(Some(computed));
            assert_eq!(
                runtime.check_write().unwrap_err().as_fault(),
                Some(Fault::IllegalMutation)
            );
        }
        {
            let _scope = runtime.exchange_watcher(Some(effect));
            assert!(runtime.check_write().is_ok());
        }

        let _evaluation = runtime.evaluate(computed);
        runtime.untracked(|| {
            assert_eq!(
                runtime.check_write().unwrap_err().as_fault(),
                Some(Fault::IllegalMutation)
            );
        });
    }

    #[test]
    fn untracked_hides_the_watcher() {
        let runtime = Runtime::new(GraphConfig::default());
        let id = runtime.register(Role::Source);
        let _scope = runtime.exchange_watcher(Some(id));

        assert!(runtime.is_tracking());
        runtime.untracked(|| assert!(!runtime.is_tracking()));
        assert!(runtime.is_tracking());
    }
}
