//! Computed Implementation
//!
//! A computed node is a cached derived value that re-evaluates only when
//! one of the values it read last time really changed.
//!
//! # How Computed Nodes Work
//!
//! 1. Nothing runs at creation. The first read evaluates the function and
//!    caches the result, which may be a value or a failure.
//!
//! 2. When accessed again, if no source anywhere in the graph was written
//!    since the last check, the cache is returned straight away.
//!
//! 3. When a dependency changes, an observed node is flagged "outdated".
//!    An unobserved one is not told anything and relies on the global
//!    version instead.
//!
//! 4. On the next read, each dependency is asked for its current version,
//!    refreshing upstream computed nodes on the way. Only if one of them
//!    differs from what was recorded does the function run again.
//!
//! 5. If the new result equals the cached one, the node's version is left
//!    alone and nothing downstream re-runs.
//!
//! # Why This Matters
//!
//! Writing a source with a hundred derived nodes behind it costs nothing
//! until something reads them, and then only the nodes on the path that is
//! read are evaluated.
//!
//! # Failure
//!
//! A failing function caches its error. Reads keep returning it without
//! running the function again until an upstream change forces a retry.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Fault, Result};
use crate::graph::{NodeId, Refresh, Role, Side, Status};

use super::runtime::{Freshness, Runtime};
use super::subscriber::{Bridge, Observer, Subscription};

type Compute<T> = Box<dyn Fn() -> Result<T>>;

struct ComputedNode<T> {
    runtime: Rc<Runtime>,
    id: NodeId,
    compute: Compute<T>,
    cached: RefCell<Option<Result<T>>>,
    bridge: Bridge<T>,
}

impl<T> ComputedNode<T>
where
    T: PartialEq + Clone + 'static,
{
    fn recompute(&self) {
        let id = self.id;
        self.runtime.with(|scheduler| scheduler.backup(id));

        let result = {
            let _scope = self.runtime.evaluate(id);
            (self.compute)()
        };

        let changed = {
            let mut cached = self.cached.borrow_mut();
            let changed = match (cached.as_ref(), &result) {
                (Some(Ok(old)), Ok(new)) => old != new,
                _ => true,
            };
            if changed {
                *cached = Some(result);
            }
            changed
        };
        tracing::trace!(%id, changed, "computed re-evaluated");

        self.runtime.end_pass(id, changed);
    }

    fn read(&self, tracked: bool) -> Result<T> {
        let status = self.runtime.status(self.id);
        if status.contains(Status::DISPOSED) {
            return Err(Fault::Disposed.into());
        }
        if status.contains(Status::RUNNING) {
            return Err(Fault::Cycle.into());
        }

        let edge = if tracked {
            self.runtime.add_dependency(self.id)
        } else {
            None
        };
        self.refresh();
        if let Some(edge) = edge {
            self.runtime.sync_edge(edge, self.id);
        }

        self.cached
            .borrow()
            .clone()
            .unwrap_or_else(|| Err(Error::Fault(Fault::Cycle)))
    }
}

impl<T> Refresh for ComputedNode<T>
where
    T: PartialEq + Clone + 'static,
{
    fn refresh(&self) -> bool {
        match self.runtime.begin_refresh(self.id) {
            Freshness::Cycle => false,
            Freshness::Fresh => true,
            Freshness::Stale => {
                self.recompute();
                true
            }
        }
    }
}

impl<T> Drop for ComputedNode<T> {
    fn drop(&mut self) {
        self.bridge.shutdown();
        self.runtime.unregister(self.id);
    }
}

/// A lazily evaluated, memoized function of other nodes.
///
/// Cloning a `Computed` yields another handle to the same node.
///
/// # Example
///
/// ```rust
/// use signals_core::Graph;
///
/// let graph = Graph::new();
/// let count = graph.source(2);
/// let doubled = graph.derive({
///     let count = count.clone();
///     move || Ok(count.get() * 2)
/// });
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computed<T> {
    node: Rc<ComputedNode<T>>,
}

impl<T> Computed<T>
where
    T: PartialEq + Clone + 'static,
{
    pub(crate) fn new(runtime: &Rc<Runtime>, compute: impl Fn() -> Result<T> + 'static) -> Self {
        let node = Rc::new_cyclic(|weak: &Weak<ComputedNode<T>>| {
            let id = runtime.register(Role::Computed(weak.clone()));
            ComputedNode {
                runtime: Rc::clone(runtime),
                id,
                compute: Box::new(compute),
                cached: RefCell::new(None),
                bridge: Bridge::new(),
            }
        });
        tracing::trace!(id = %node.id, "computed created");
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Get the current result, re-evaluating first if needed.
    ///
    /// Inside another computed node or effect, this also records the read
    /// as a dependency.
    pub fn get(&self) -> Result<T> {
        self.node.read(true)
    }

    /// Get the current result without recording a dependency.
    pub fn peek(&self) -> Result<T> {
        self.node.read(false)
    }

    /// Push every result of this node to `observer`, starting with the
    /// current one.
    pub fn subscribe(&self, observer: impl Observer<T> + 'static) -> Result<Subscription> {
        let weak = Rc::downgrade(&self.node);
        let read = move || -> Result<T> {
            weak.upgrade()
                .ok_or(Error::Fault(Fault::Disposed))?
                .read(true)
        };
        self.node
            .bridge
            .subscribe(&self.node.runtime, Rc::new(read), Rc::new(observer))
    }

    /// Detach this node from the graph and drop its cached result.
    ///
    /// Later reads fail with [`Fault::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        if !self.is_disposed() {
            tracing::debug!(id = %self.node.id, "computed disposed");
        }
        self.node.runtime.dispose_node(self.node.id);
        self.node.cached.borrow_mut().take();
        self.node.bridge.shutdown();
    }

    pub fn is_disposed(&self) -> bool {
        self.node.runtime.status(self.node.id).contains(Status::DISPOSED)
    }

    /// Whether a successful result is cached.
    pub fn has_value(&self) -> bool {
        matches!(*self.node.cached.borrow(), Some(Ok(_)))
    }

    /// Number of nodes currently linked as observers.
    pub fn observer_count(&self) -> usize {
        self.node.runtime.with(|scheduler| {
            scheduler
                .get_node(self.node.id)
                .map_or(0, |slot| slot.targets.collect(&scheduler.edges, Side::Targets).len())
        })
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.node.bridge.observer_count()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.node.id)
            .field("cached", &self.node.cached.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::{Error, Fault, Graph};

    fn counter() -> (Rc<Cell<usize>>, impl Fn() + Clone) {
        let count = Rc::new(Cell::new(0));
        let bump = {
            let count = Rc::clone(&count);
            move || count.set(count.get() + 1)
        };
        (count, bump)
    }

    #[test]
    fn computed_caches_value() {
        let graph = Graph::new();
        let (calls, bump) = counter();

        let computed = graph.derive(move || {
            bump();
            Ok(42)
        });

        assert_eq!(calls.get(), 0);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.peek().unwrap(), 42);
        assert_eq!(calls.get(), 1);
        assert!(computed.has_value());
    }

    #[test]
    fn computed_recomputes_after_write() {
        let graph = Graph::new();
        let count = graph.source(1);
        let (calls, bump) = counter();

        let doubled = graph.derive({
            let count = count.clone();
            move || {
                bump();
                Ok(count.get() * 2)
            }
        });

        assert_eq!(doubled.get().unwrap(), 2);
        count.set(2).unwrap();
        count.set(3).unwrap();
        assert_eq!(calls.get(), 1);

        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unchanged_result_stops_propagation() {
        let graph = Graph::new();
        let count = graph.source(1);
        let (calls, bump) = counter();

        let parity = graph.derive({
            let count = count.clone();
            move || Ok(count.get() % 2)
        });
        let label = graph.derive({
            let parity = parity.clone();
            move || {
                bump();
                Ok(if parity.get()? == 0 { "even" } else { "odd" })
            }
        });

        assert_eq!(label.get().unwrap(), "odd");
        count.set(3).unwrap();
        assert_eq!(label.get().unwrap(), "odd");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn failure_is_cached_until_upstream_changes() {
        let graph = Graph::new();
        let count = graph.source(-1);
        let (calls, bump) = counter();

        let checked = graph.derive({
            let count = count.clone();
            move || {
                bump();
                let n = count.get();
                if n < 0 {
                    Err(Error::msg("negative"))
                } else {
                    Ok(n)
                }
            }
        });

        let first = checked.get().unwrap_err();
        let second = checked.get().unwrap_err();
        assert_eq!(first.to_string(), "negative");
        assert_eq!(second.to_string(), "negative");
        assert_eq!(calls.get(), 1);
        assert!(!checked.has_value());

        count.set(4).unwrap();
        assert_eq!(checked.get().unwrap(), 4);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph = Graph::new();
        let slot: Rc<std::cell::RefCell<Option<crate::Computed<i32>>>> = Rc::default();

        let looped = graph.derive({
            let slot = Rc::clone(&slot);
            move || match slot.borrow().as_ref() {
                Some(me) => me.get(),
                None => Ok(0),
            }
        });
        *slot.borrow_mut() = Some(looped.clone());

        assert_eq!(looped.get().unwrap_err().as_fault(), Some(Fault::Cycle));
        slot.borrow_mut().take();
    }

    #[test]
    fn untracked_write_inside_computed_is_rejected() {
        let graph = Graph::new();
        let count = graph.source(1);

        let sneaky = graph.derive({
            let (graph, count) = (graph.clone(), count.clone());
            move || {
                graph.untracked(|| count.set(2))?;
                Ok(0)
            }
        });

        assert_eq!(sneaky.get().unwrap_err().as_fault(), Some(Fault::IllegalMutation));
        assert_eq!(count.peek(), 1);

        // Outside the evaluation the same write goes through.
        count.set(3).unwrap();
        assert_eq!(count.peek(), 3);
    }

    #[test]
    fn disposed_computed_reports_disposal() {
        let graph = Graph::new();
        let count = graph.source(1);
        let doubled = graph.derive({
            let count = count.clone();
            move || Ok(count.get() * 2)
        });
        assert_eq!(doubled.get().unwrap(), 2);

        doubled.dispose();
        doubled.dispose();
        assert!(doubled.is_disposed());
        assert_eq!(doubled.get().unwrap_err().as_fault(), Some(Fault::Disposed));
        assert_eq!(doubled.peek().unwrap_err().as_fault(), Some(Fault::Disposed));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn observed_computed_tracks_and_releases() {
        let graph = Graph::new();
        let count = graph.source(1);
        let doubled = graph.derive({
            let count = count.clone();
            move || Ok(count.get() * 2)
        });

        doubled.get().unwrap();
        assert_eq!(count.observer_count(), 0);

        let watch = graph
            .watch({
                let doubled = doubled.clone();
                move || {
                    doubled.get()?;
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(count.observer_count(), 1);
        assert_eq!(doubled.observer_count(), 1);

        drop(watch);
        assert_eq!(count.observer_count(), 0);
        assert_eq!(doubled.observer_count(), 0);
    }
}
