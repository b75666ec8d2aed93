//! Subscription Bridge
//!
//! Connects push-style observers outside the graph to a source or computed
//! node inside it.
//!
//! The first subscription to a node creates an internal effect that reads
//! the node and forwards each result to every registered observer. Later
//! subscriptions reuse that effect and are immediately handed the last value
//! it delivered. When the last subscription goes away the effect is disposed
//! and the node becomes unobserved again.
//!
//! A failed read is delivered through [`Observer::error`] and ends the
//! stream: the observers are released and the effect is disposed. Disposing
//! the node itself ends the stream with [`Observer::completed`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::graph::Run;

use super::effect::{Callback, Cleanup, EffectNode};
use super::runtime::Runtime;

/// Receiver of the values pushed by a subscription.
pub trait Observer<T> {
    /// Called with every new value, and once on subscribe.
    fn next(&self, value: &T);

    /// Called when reading the node failed. No more calls follow.
    fn error(&self, _error: &Error) {}

    /// Called when the node is disposed. No more calls follow.
    fn completed(&self) {}
}

impl<T, F> Observer<T> for F
where
    F: Fn(&T),
{
    fn next(&self, value: &T) {
        self(value)
    }
}

type Reader<T> = Rc<dyn Fn() -> Result<T>>;
type Observers<T> = SmallVec<[Rc<dyn Observer<T>>; 4]>;

struct BridgeState<T> {
    effect: Option<Rc<EffectNode>>,
    observers: IndexMap<u64, Rc<dyn Observer<T>>>,
    latest: Option<T>,
    next_key: u64,
}

impl<T> BridgeState<T> {
    fn snapshot(&self) -> Observers<T> {
        self.observers.values().cloned().collect()
    }
}

/// Per-node observer registry and its backing effect.
pub(crate) struct Bridge<T> {
    state: Rc<RefCell<BridgeState<T>>>,
}

impl<T> Bridge<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(BridgeState {
                effect: None,
                observers: IndexMap::new(),
                latest: None,
                next_key: 0,
            })),
        }
    }

    /// End the stream: dispose the backing effect and complete every
    /// remaining observer.
    pub(crate) fn shutdown(&self) {
        let (effect, observers) = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                tracing::warn!("bridge state busy during shutdown, observers left uncompleted");
                return;
            };
            let observers: Observers<T> = state.observers.drain(..).map(|(_, observer)| observer).collect();
            state.latest = None;
            (state.effect.take(), observers)
        };

        if let Some(effect) = effect {
            if let Err(error) = effect.dispose() {
                tracing::warn!(id = %effect.id(), %error, "bridge effect failed to dispose");
            }
        }
        for observer in observers {
            observer.completed();
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.state.borrow().observers.len()
    }
}

impl<T: Clone + 'static> Bridge<T> {
    /// Register `observer`, creating the backing effect on first use.
    pub(crate) fn subscribe(
        &self,
        runtime: &Rc<Runtime>,
        read: Reader<T>,
        observer: Rc<dyn Observer<T>>,
    ) -> Result<Subscription> {
        let (key, live, replay) = {
            let mut state = self.state.borrow_mut();
            let key = state.next_key;
            state.next_key += 1;
            state.observers.insert(key, Rc::clone(&observer));
            let live = state.effect.as_ref().is_some_and(|effect| !effect.is_disposed());
            let replay = if live { state.latest.clone() } else { None };
            (key, live, replay)
        };

        if live {
            if let Some(value) = replay {
                runtime.untracked(|| observer.next(&value));
            }
        } else {
            let weak = Rc::downgrade(&self.state);
            let delivery = Rc::clone(runtime);
            let callback: Callback = Box::new(move || -> Result<Option<Cleanup>> {
                deliver(&delivery, &weak, &read)?;
                Ok(None)
            });
            match EffectNode::spawn(runtime, callback) {
                Ok(effect) => self.state.borrow_mut().effect = Some(effect),
                Err(error) => {
                    self.state.borrow_mut().observers.shift_remove(&key);
                    return Err(error);
                }
            }
        }

        let state = Rc::downgrade(&self.state);
        Ok(Subscription {
            release: RefCell::new(Some(Box::new(move || release(&state, key)))),
        })
    }
}

/// Body of the bridge effect: read the node and fan the result out.
///
/// Only the read is tracked; observers run without a watcher.
fn deliver<T: Clone>(
    runtime: &Runtime,
    state: &Weak<RefCell<BridgeState<T>>>,
    read: &Reader<T>,
) -> Result<()> {
    let result = read();

    let Some(state) = state.upgrade() else {
        return Ok(());
    };

    match result {
        Ok(value) => {
            let observers = {
                let mut state = state.borrow_mut();
                state.latest = Some(value.clone());
                state.snapshot()
            };
            runtime.untracked(|| {
                for observer in observers {
                    observer.next(&value);
                }
            });
            Ok(())
        }
        Err(error) => {
            let observers: Observers<T> = {
                let mut state = state.borrow_mut();
                state.latest = None;
                state.observers.drain(..).map(|(_, observer)| observer).collect()
            };
            runtime.untracked(|| {
                for observer in observers {
                    observer.error(&error);
                }
            });
            Err(error)
        }
    }
}

/// Remove one observer; the last one out disposes the bridge effect.
fn release<T>(state: &Weak<RefCell<BridgeState<T>>>, key: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let effect = {
        let mut state = state.borrow_mut();
        if state.observers.shift_remove(&key).is_none() || !state.observers.is_empty() {
            return;
        }
        state.latest = None;
        state.effect.take()
    };

    if let Some(effect) = effect {
        if let Err(error) = effect.dispose() {
            tracing::warn!(id = %effect.id(), %error, "bridge effect failed to dispose");
        }
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes"]
pub struct Subscription {
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    /// Stop receiving values. Idempotent.
    pub fn unsubscribe(&self) {
        let release = self.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.borrow().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
