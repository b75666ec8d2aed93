//! Error Types
//!
//! Two kinds of failure flow through the graph and they are kept apart:
//!
//! - [`Fault`]: a programming error in how the graph is used, such as a
//!   dependency cycle or a write from inside a derived computation. These are
//!   never the result of bad data.
//! - [`Failure`]: a recoverable error raised by user code (a compute function,
//!   an effect callback or a cleanup). Failures are cached by computed nodes
//!   and re-raised on every read until an upstream change forces a retry, so
//!   they are cheaply cloneable.
//!
//! Both are carried by [`Error`], the error type of every fallible operation.

use std::fmt;
use std::rc::Rc;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Misuse of the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// A node observed itself while running, or effects kept rescheduling
    /// each other past the generation bound.
    #[error("cycle detected")]
    Cycle,

    /// A source was written from inside a computed node's evaluation.
    #[error("source written during a derived evaluation")]
    IllegalMutation,

    /// A computed node was read after being disposed.
    #[error("node used after disposal")]
    Disposed,
}

/// A user-level failure, shared so it can be cached and re-raised.
#[derive(Clone)]
pub struct Failure(Rc<dyn std::error::Error + 'static>);

impl Failure {
    /// Wrap any error type.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self(Rc::new(error))
    }

    /// Build a failure from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(Rc::new(Message(message.to_string())))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        &*self.0
    }

    /// Whether two failures are the same cached error instance.
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Error returned by reads, writes, watches and subscriptions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error(transparent)]
    Failure(#[from] Failure),
}

impl Error {
    /// Shorthand for a [`Failure`] built from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Failure(Failure::msg(message))
    }

    /// Shorthand for a [`Failure`] wrapping an error value.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::Failure(Failure::new(error))
    }

    /// The fault, if this error is one.
    pub fn as_fault(&self) -> Option<Fault> {
        match self {
            Self::Fault(fault) => Some(*fault),
            Self::Failure(_) => None,
        }
    }

    pub fn is_cycle(&self) -> bool {
        self.as_fault() == Some(Fault::Cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_clones_share_the_same_error() {
        let failure = Failure::msg("boom");
        let copy = failure.clone();

        assert!(failure.ptr_eq(&copy));
        assert_eq!(copy.to_string(), "boom");
    }

    #[test]
    fn faults_are_distinguished_from_failures() {
        let cycle: Error = Fault::Cycle.into();
        assert!(cycle.is_cycle());

        let failed = Error::msg("bad input");
        assert_eq!(failed.as_fault(), None);
        assert_eq!(failed.to_string(), "bad input");
    }

    #[test]
    fn failure_wraps_std_errors() {
        let parse = "x".parse::<i32>().unwrap_err();
        let error = Error::failed(parse);

        assert!(matches!(error, Error::Failure(_)));
        assert!(error.to_string().contains("invalid digit"));
    }
}
