//! Source Implementation
//!
//! A source is the fundamental reactive primitive. It holds a value and
//! is the root of every dependency chain.
//!
//! # How Sources Work
//!
//! 1. When a source is read while a computed node or effect is evaluating,
//!    the read is recorded as a dependency edge stamped with the source's
//!    current version.
//!
//! 2. When a source is written with a different value, its version and the
//!    graph's global version are bumped and every dependent is notified.
//!
//! 3. Notified effects run once the outermost batch closes.
//!
//! Writing a value equal to the current one does nothing at all.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Fault, Result};
use crate::graph::{NodeId, Role, Side, Status};

use super::runtime::Runtime;
use super::subscriber::{Bridge, Observer, Subscription};

struct SourceNode<T> {
    runtime: Rc<Runtime>,
    id: NodeId,
    value: RefCell<T>,
    bridge: Bridge<T>,
}

impl<T> Drop for SourceNode<T> {
    fn drop(&mut self) {
        self.bridge.shutdown();
        self.runtime.unregister(self.id);
    }
}

/// A mutable reactive value.
///
/// Cloning a `Source` yields another handle to the same node.
///
/// # Example
///
/// ```rust
/// use signals_core::Graph;
///
/// let graph = Graph::new();
/// let count = graph.source(0);
///
/// count.set(5).unwrap();
/// count.update(|n| n + 1).unwrap();
/// assert_eq!(count.get(), 6);
/// ```
pub struct Source<T> {
    node: Rc<SourceNode<T>>,
}

impl<T> Source<T>
where
    T: PartialEq + Clone + 'static,
{
    pub(crate) fn new(runtime: &Rc<Runtime>, value: T) -> Self {
        let id = runtime.register(Role::Source);
        tracing::trace!(%id, "source created");
        Self {
            node: Rc::new(SourceNode {
                runtime: Rc::clone(runtime),
                id,
                value: RefCell::new(value),
                bridge: Bridge::new(),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Get the current value.
    ///
    /// Inside a computed node or effect, this also records the read as a
    /// dependency.
    pub fn get(&self) -> T {
        self.node.runtime.track(self.node.id);
        self.peek()
    }

    /// Get the current value without recording a dependency.
    pub fn peek(&self) -> T {
        self.node.value.borrow().clone()
    }

    /// Store a new value and notify dependents.
    ///
    /// Fails with [`Fault::IllegalMutation`] when called from inside a
    /// computed node's evaluation. Any error raised by effects flushed as a
    /// result of this write is returned as well.
    pub fn set(&self, value: T) -> Result<()> {
        let node = &self.node;
        node.runtime.check_write()?;

        if *node.value.borrow() == value {
            return Ok(());
        }
        *node.value.borrow_mut() = value;

        if node.runtime.status(node.id).contains(Status::DISPOSED) {
            return Ok(());
        }
        node.runtime.notify_change(node.id)
    }

    /// Set the value to `f(&current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = {
            let current = self.node.value.borrow();
            f(&*current)
        };
        self.set(next)
    }

    /// Push every value of this source to `observer`, starting with the
    /// current one.
    pub fn subscribe(&self, observer: impl Observer<T> + 'static) -> Result<Subscription> {
        let weak = Rc::downgrade(&self.node);
        let read = move || -> Result<T> {
            let node = weak.upgrade().ok_or(Error::Fault(Fault::Disposed))?;
            node.runtime.track(node.id);
            let value = node.value.borrow().clone();
            Ok(value)
        };
        self.node
            .bridge
            .subscribe(&self.node.runtime, Rc::new(read), Rc::new(observer))
    }

    /// Detach this source from the graph.
    ///
    /// Observers are dropped and receive no further notifications. The value
    /// can still be read and written. Idempotent.
    pub fn dispose(&self) {
        if !self.is_disposed() {
            tracing::debug!(id = %self.node.id, "source disposed");
        }
        self.node.runtime.dispose_node(self.node.id);
        self.node.bridge.shutdown();
    }

    pub fn is_disposed(&self) -> bool {
        self.node.runtime.status(self.node.id).contains(Status::DISPOSED)
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

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.node.id)
            .field("value", &*self.node.value.borrow())
            .finish()
    }
}
