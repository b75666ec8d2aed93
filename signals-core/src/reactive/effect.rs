//! Effect Implementation
//!
//! An effect is a side-effecting computation that runs whenever one of the
//! values it read last time really changed.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When a dependency is written, the effect is queued. It runs when the
//!    outermost batch closes.
//!
//! 3. Before re-running it asks its dependencies whether anything changed.
//!    A computed that was notified but recomputed to the same value does not
//!    re-run the effect.
//!
//! 4. While running, the old dependencies are backed up and the ones read
//!    this time are kept. Everything else is dropped.
//!
//! # Cleanup
//!
//! The cleanup variant returns a function from each run. It is called before
//! the next run and when the effect is disposed. A failing cleanup disposes
//! the effect.
//!
//! # Failure
//!
//! An effect whose callback fails is disposed by the flush that ran it. The
//! other queued effects still run and the first failure is returned to
//! whoever triggered the flush.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Fault, Result};
use crate::graph::{NodeId, Role, Run, Status};

use super::runtime::Runtime;

/// Teardown returned by a watch-with-cleanup callback.
pub type Cleanup = Box<dyn FnOnce() -> Result<()>>;

pub(crate) type Callback = Box<dyn FnMut() -> Result<Option<Cleanup>>>;

/// The graph-facing half of an effect.
pub(crate) struct EffectNode {
    runtime: Rc<Runtime>,
    id: NodeId,
    callback: RefCell<Callback>,
    cleanup: RefCell<Option<Cleanup>>,
    run_count: Cell<usize>,
}

impl EffectNode {
    /// Register an effect and run it once.
    ///
    /// If the first run fails the effect is disposed and the error returned.
    pub(crate) fn spawn(runtime: &Rc<Runtime>, callback: Callback) -> Result<Rc<Self>> {
        let node = Rc::new_cyclic(|weak: &Weak<Self>| {
            let id = runtime.register(Role::Effect(weak.clone()));
            Self {
                runtime: Rc::clone(runtime),
                id,
                callback: RefCell::new(callback),
                cleanup: RefCell::new(None),
                run_count: Cell::new(0),
            }
        });
        tracing::trace!(id = %node.id, "effect created");

        if let Err(error) = node.run() {
            if let Err(cleanup_error) = node.dispose() {
                tracing::warn!(id = %node.id, error = %cleanup_error, "cleanup failed after first run");
            }
            return Err(error);
        }
        Ok(node)
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.runtime.status(self.id).contains(Status::DISPOSED)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.get()
    }

    /// Run the pending cleanup, if any, with no watcher and inside a batch.
    fn run_cleanup(&self) -> Result<()> {
        let cleanup = self.cleanup.borrow_mut().take();
        let Some(cleanup) = cleanup else {
            return Ok(());
        };

        let batch = self.runtime.start_batch();
        let result = self.runtime.untracked(cleanup);
        let flushed = batch.finish();
        result.and(flushed)
    }

    fn set_running(&self, running: bool) {
        self.runtime.with(|scheduler| {
            if let Some(slot) = scheduler.get_node_mut(self.id) {
                if running {
                    slot.status.insert(Status::RUNNING);
                } else {
                    slot.status.remove(Status::RUNNING);
                }
            }
        });
    }
}

impl Run for EffectNode {
    fn run(&self) -> Result<()> {
        let id = self.id;
        let (has_sources, runnable) = self.runtime.with(|scheduler| {
            let Some(slot) = scheduler.get_node_mut(id) else {
                return (false, Ok(false));
            };
            slot.status.remove(Status::NOTIFIED);
            let runnable = if slot.status.contains(Status::DISPOSED) {
                Ok(false)
            } else if slot.status.contains(Status::RUNNING) {
                Err(Fault::Cycle)
            } else {
                Ok(true)
            };
            (!slot.sources.is_empty(), runnable)
        });
        if !runnable? {
            return Ok(());
        }
        if has_sources && !self.runtime.needs_to_recompute(id) {
            return Ok(());
        }

        self.set_running(true);
        if let Err(error) = self.run_cleanup() {
            self.set_running(false);
            self.runtime.dispose_node(id);
            return Err(error);
        }

        self.runtime.with(|scheduler| scheduler.backup(id));
        let batch = self.runtime.start_batch();
        let result = {
            let _scope = self.runtime.exchange_watcher(Some(id));
            let mut callback = self.callback.borrow_mut();
            (*callback)()
        };
        self.run_count.set(self.run_count.get() + 1);
        tracing::trace!(%id, runs = self.run_count.get(), "effect ran");

        let result = result.map(|cleanup| {
            *self.cleanup.borrow_mut() = cleanup;
        });

        let teardown = if self.runtime.end_pass(id, false) {
            self.run_cleanup()
        } else {
            Ok(())
        };
        let flushed = batch.finish();

        result.and(teardown).and(flushed)
    }

    fn dispose(&self) -> Result<()> {
        let first = !self.is_disposed();
        let idle = self.runtime.dispose_node(self.id);
        if first {
            tracing::debug!(id = %self.id, deferred = !idle, "effect disposed");
        }
        if idle {
            self.run_cleanup()
        } else {
            Ok(())
        }
    }
}

impl Drop for EffectNode {
    fn drop(&mut self) {
        self.runtime.unregister(self.id);
    }
}

impl fmt::Debug for EffectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectNode")
            .field("id", &self.id)
            .field("run_count", &self.run_count.get())
            .finish()
    }
}

/// Handle to a running effect.
///
/// Dropping the handle disposes the effect. Keep it for as long as the
/// effect should stay live.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use signals_core::Graph;
///
/// let graph = Graph::new();
/// let count = graph.source(0);
/// let seen = Rc::new(Cell::new(0));
///
/// let watch = graph
///     .watch({
///         let count = count.clone();
///         let seen = Rc::clone(&seen);
///         move || {
///             seen.set(count.get());
///             Ok(())
///         }
///     })
///     .unwrap();
///
/// count.set(5).unwrap();
/// assert_eq!(seen.get(), 5);
///
/// watch.dispose().unwrap();
/// count.set(6).unwrap();
/// assert_eq!(seen.get(), 5);
/// ```
#[must_use = "dropping a Watch disposes the effect"]
pub struct Watch {
    node: Rc<EffectNode>,
}

impl Watch {
    pub(crate) fn new(node: Rc<EffectNode>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Stop the effect and run its pending cleanup.
    ///
    /// Idempotent. Called from inside the effect's own run, the teardown is
    /// deferred until that run completes.
    pub fn dispose(&self) -> Result<()> {
        self.node.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.node.is_disposed()
    }

    /// How many times the callback has been invoked.
    pub fn run_count(&self) -> usize {
        self.node.run_count()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Err(error) = self.node.dispose() {
            tracing::warn!(id = %self.node.id(), %error, "cleanup failed while dropping a watch");
        }
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.node.id())
            .field("run_count", &self.node.run_count())
            .field("disposed", &self.node.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::{Error, Fault, Graph};

    #[test]
    fn effect_runs_on_creation() {
        let graph = Graph::new();
        let runs = Rc::new(Cell::new(0));

        let watch = graph
            .watch({
                let runs = Rc::clone(&runs);
                move || {
                    runs.set(runs.get() + 1);
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(runs.get(), 1);
        assert_eq!(watch.run_count(), 1);
    }

    #[test]
    fn effect_reruns_on_change() {
        let graph = Graph::new();
        let count = graph.source(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _watch = graph
            .watch({
                let count = count.clone();
                let seen = Rc::clone(&seen);
                move || {
                    seen.borrow_mut().push(count.get());
                    Ok(())
                }
            })
            .unwrap();

        count.set(1).unwrap();
        count.set(1).unwrap();
        count.set(2).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let graph = Graph::new();
        let count = graph.source(0);

        let watch = graph
            .watch({
                let count = count.clone();
                move || {
                    count.get();
                    Ok(())
                }
            })
            .unwrap();

        count.set(1).unwrap();
        assert_eq!(watch.run_count(), 2);

        watch.dispose().unwrap();
        watch.dispose().unwrap();
        assert!(watch.is_disposed());
        assert_eq!(count.observer_count(), 0);

        count.set(2).unwrap();
        assert_eq!(watch.run_count(), 2);
    }

    #[test]
    fn dropping_the_handle_disposes() {
        let graph = Graph::new();
        let count = graph.source(0);
        let runs = Rc::new(Cell::new(0));

        let watch = graph
            .watch({
                let count = count.clone();
                let runs = Rc::clone(&runs);
                move || {
                    count.get();
                    runs.set(runs.get() + 1);
                    Ok(())
                }
            })
            .unwrap();
        drop(watch);

        count.set(1).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let graph = Graph::new();
        let count = graph.source(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let watch = graph
            .watch_with_cleanup({
                let count = count.clone();
                let log = Rc::clone(&log);
                move || {
                    let value = count.get();
                    log.borrow_mut().push(format!("run {value}"));
                    let log = Rc::clone(&log);
                    Ok(move || {
                        log.borrow_mut().push(format!("cleanup {value}"));
                        Ok(())
                    })
                }
            })
            .unwrap();

        count.set(1).unwrap();
        watch.dispose().unwrap();
        watch.dispose().unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn failing_cleanup_disposes_the_effect() {
        let graph = Graph::new();
        let count = graph.source(0);

        let watch = graph
            .watch_with_cleanup({
                let count = count.clone();
                move || {
                    count.get();
                    Ok(|| Err(Error::msg("cleanup failed")))
                }
            })
            .unwrap();

        let error = count.set(1).unwrap_err();
        assert_eq!(error.to_string(), "cleanup failed");
        assert!(watch.is_disposed());
        assert_eq!(watch.run_count(), 1);
    }

    #[test]
    fn failing_first_run_disposes_and_returns_the_error() {
        let graph = Graph::new();
        let count = graph.source(0);

        let result = graph.watch({
            let count = count.clone();
            move || {
                count.get();
                Err(Error::msg("no"))
            }
        });

        assert_eq!(result.unwrap_err().to_string(), "no");
        assert_eq!(count.observer_count(), 0);
    }

    #[test]
    fn effect_writing_what_it_reads_is_a_cycle() {
        let graph = Graph::new();
        let count = graph.source(0);

        let result = graph.watch({
            let count = count.clone();
            move || count.set(count.get() + 1)
        });

        assert_eq!(result.unwrap_err().as_fault(), Some(Fault::Cycle));
        assert_eq!(count.observer_count(), 0);
    }

    #[test]
    fn dispose_inside_own_run_is_deferred() {
        let graph = Graph::new();
        let count = graph.source(0);
        let slot: Rc<RefCell<Option<crate::Watch>>> = Rc::new(RefCell::new(None));
        let cleaned = Rc::new(Cell::new(0));

        let watch = graph
            .watch_with_cleanup({
                let count = count.clone();
                let slot = Rc::clone(&slot);
                let cleaned = Rc::clone(&cleaned);
                move || {
                    if count.get() > 0 {
                        if let Some(watch) = slot.borrow().as_ref() {
                            watch.dispose()?;
                        }
                    }
                    let cleaned = Rc::clone(&cleaned);
                    Ok(move || {
                        cleaned.set(cleaned.get() + 1);
                        Ok(())
                    })
                }
            })
            .unwrap();
        *slot.borrow_mut() = Some(watch);

        count.set(1).unwrap();
        let watch = slot.borrow_mut().take().unwrap();
        assert!(watch.is_disposed());
        // One cleanup before the second run, one after the deferred teardown.
        assert_eq!(cleaned.get(), 2);
        assert_eq!(count.observer_count(), 0);
    }
}
