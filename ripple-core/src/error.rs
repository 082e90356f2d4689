//! Error types for the reactive graph and scheduler.
//!
//! There are three families of failure:
//!
//! - Evaluation errors: an initializer or compute closure failed. These are
//!   stored on the node and handed back to every reader of that node.
//! - Contract errors: the caller misused the API (writing a computed node,
//!   reading a memo's own value before it has one). These are returned to the
//!   caller and never stored.
//! - Scheduler errors: reported to the host's `on_error` handler.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the graph, the change subscriber and the scheduler.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A stored initializer or compute failure, re-delivered to a reader.
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    /// Only primitive nodes accept writes.
    #[error("node {node} is computed and cannot be written")]
    NotWritable { node: NodeId },

    /// A memo read its own value before it ever produced one.
    #[error("node {node} read itself before holding a value")]
    SelfReadBeforeValue { node: NodeId },

    /// A stored value could not be viewed as the requested type.
    #[error("node {node} does not hold a value of type `{expected}`")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
    },

    /// A node had no state right after being resolved.
    #[error("node {node} has no state after evaluation")]
    MissingState { node: NodeId },

    /// A flush ran more compute/effect passes than the configured limit.
    #[error("flush stopped after {passes} passes with work still queued")]
    FlushLimit { passes: u32 },
}

impl Error {
    /// Whether this error reports API misuse rather than a failed evaluation.
    ///
    /// Contract errors escape compute closures without being stored as the
    /// node's state.
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            Error::NotWritable { .. }
                | Error::SelfReadBeforeValue { .. }
                | Error::TypeMismatch { .. }
                | Error::MissingState { .. }
        )
    }

    /// The evaluation failure carried by this error, if any.
    pub fn as_evaluation(&self) -> Option<&EvalError> {
        match self {
            Error::Evaluation(error) => Some(error),
            _ => None,
        }
    }
}

/// A failure raised by an initializer or compute closure.
///
/// Cloning is cheap and preserves identity: one stored failure is handed to
/// every reader, and two `EvalError`s are the [`same`](EvalError::same) error
/// only if they came from the same evaluation.
#[derive(Clone)]
pub struct EvalError(Rc<dyn std::error::Error + 'static>);

impl EvalError {
    /// Wrap any error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self(Rc::new(error))
    }

    /// Build an error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(Message(message.to_string()))
    }

    /// Identity comparison.
    pub fn same(&self, other: &EvalError) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    /// Borrow the wrapped error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EvalError").field(&self.0).finish()
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn clones_are_the_same_error() {
        let error = EvalError::msg("boom");
        let copy = error.clone();
        assert!(error.same(&copy));
        assert!(!error.same(&EvalError::msg("boom")));
    }

    #[test]
    fn downcast_recovers_the_source() {
        let error = EvalError::new(DiskError);
        assert!(error.downcast_ref::<DiskError>().is_some());
        assert_eq!(error.to_string(), "disk on fire");
    }

    #[test]
    fn contract_classification() {
        let node = NodeId::from(7);
        assert!(Error::NotWritable { node }.is_contract());
        assert!(Error::SelfReadBeforeValue { node }.is_contract());
        assert!(!Error::from(EvalError::msg("x")).is_contract());
        assert!(!Error::FlushLimit { passes: 3 }.is_contract());
    }
}
