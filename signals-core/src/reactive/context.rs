//! Evaluation Context
//!
//! Two pieces of scheduler state are entered and left in strictly nested
//! scopes: the current watcher and the batch depth. Both are handled by
//! guards that restore the previous state when dropped, so a panic unwinding
//! out of user code leaves them as they were.
//!
//! Per-node state is not unwound. A node whose function panicked stays
//! flagged as running, and reading it afterwards reports a cycle.
//!
//! # Watcher
//!
//! While a node's function runs it is the *watcher*: any source read in the
//! meantime becomes one of its dependencies. Reading a computed node runs that
//! node's function with itself as watcher, so scopes nest arbitrarily deep.
//!
//! # Batch
//!
//! Writes inside a batch only queue effects. The outermost batch flushes the
//! queue when it finishes.

use crate::error::Result;
use crate::graph::NodeId;

use super::runtime::Runtime;

/// Guard that restores the previous watcher when dropped.
pub struct WatcherScope<'a> {
    runtime: &'a Runtime,
    previous: Option<NodeId>,
    installed: Option<NodeId>,
}

impl<'a> WatcherScope<'a> {
    /// Install `watcher` (or no watcher) for the lifetime of the guard.
    pub(crate) fn enter(runtime: &'a Runtime, watcher: Option<NodeId>) -> Self {
        let previous = runtime.with(|scheduler| std::mem::replace(&mut scheduler.watcher, watcher));
        Self {
            runtime,
            previous,
            installed: watcher,
        }
    }

    /// The watcher that was active before this scope.
    pub fn previous(&self) -> Option<NodeId> {
        self.previous
    }
}

impl Drop for WatcherScope<'_> {
    fn drop(&mut self) {
        let popped = self
            .runtime
            .with(|scheduler| std::mem::replace(&mut scheduler.watcher, self.previous));

        // Verify we're restoring the right scope.
        // This helps catch bugs where scopes are released out of order.
        debug_assert_eq!(
            popped, self.installed,
            "WatcherScope mismatch: expected {:?}, got {:?}",
            self.installed, popped
        );
    }
}

/// Guard for a computed node's evaluation: installs the node as watcher and
/// counts it as evaluating until dropped.
pub(crate) struct EvaluationScope<'a> {
    runtime: &'a Runtime,
    _watcher: WatcherScope<'a>,
}

impl<'a> EvaluationScope<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, id: NodeId) -> Self {
        runtime.with(|scheduler| scheduler.evaluating += 1);
        Self {
            runtime,
            _watcher: WatcherScope::enter(runtime, Some(id)),
        }
    }
}

impl Drop for EvaluationScope<'_> {
    fn drop(&mut self) {
        self.runtime
            .with(|scheduler| scheduler.evaluating = scheduler.evaluating.saturating_sub(1));
    }
}

/// Guard for one level of batch nesting.
///
/// [`finish`](BatchScope::finish) closes the batch and, at the outermost
/// level, flushes pending effects. Dropping an unfinished scope only restores
/// the depth.
pub struct BatchScope<'a> {
    runtime: &'a Runtime,
    open: bool,
}

impl<'a> BatchScope<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.with(|scheduler| scheduler.batch_depth += 1);
        Self {
            runtime,
            open: true,
        }
    }

    /// Close the batch, flushing effects if this was the outermost one.
    pub fn finish(mut self) -> Result<()> {
        // Stays open until the flush returns, so a panicking effect still
        // restores the depth on unwind.
        let result = self.runtime.end_batch();
        self.open = false;
        result
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.runtime.with(|scheduler| {
                scheduler.batch_depth = scheduler.batch_depth.saturating_sub(1);
                if scheduler.batch_depth == 0 {
                    scheduler.generation = 0;
                }
            });
        }
    }
}
