//! Per-node state owned by the graph.

use std::rc::Rc;

use indexmap::IndexMap;

use super::node::{Definition, NodeId, Value};
use crate::error::EvalError;

/// What the last evaluation of a node produced.
pub(crate) type Outcome = Result<Value, EvalError>;

/// Whether two outcomes are the same stored allocation.
pub(crate) fn same_outcome(a: &Outcome, b: &Outcome) -> bool {
    match (a, b) {
        (Ok(a), Ok(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
        (Err(a), Err(b)) => a.same(b),
        _ => false,
    }
}

/// Mutable state of one node.
pub(crate) struct NodeState {
    /// The definition this state belongs to. Keeps dependencies resolvable
    /// after every outside handle is gone.
    pub(crate) def: Rc<dyn Definition>,

    /// Bumped whenever the effective value or error changes.
    pub(crate) revision: u64,

    /// Set to `revision` while an upstream change is unconfirmed.
    pub(crate) invalidated: Option<u64>,

    /// `None` until the first evaluation finishes.
    pub(crate) outcome: Option<Outcome>,

    /// Dependencies read by the last evaluation, with the revision each one
    /// had when it was read.
    pub(crate) dependencies: IndexMap<NodeId, u64>,
}

impl NodeState {
    pub(crate) fn new(def: Rc<dyn Definition>) -> Self {
        Self {
            def,
            revision: 0,
            invalidated: None,
            outcome: None,
            dependencies: IndexMap::new(),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.outcome.is_some()
    }

    /// Invalidated and not yet confirmed or denied.
    pub(crate) fn is_pending(&self) -> bool {
        self.invalidated == Some(self.revision)
    }

    pub(crate) fn invalidate(&mut self) {
        if self.is_initialized() {
            self.invalidated = Some(self.revision);
        }
    }

    /// Store the result of an evaluation. Returns whether the revision moved.
    ///
    /// An equal value keeps the previously stored allocation, so readers that
    /// compare by identity see no change.
    pub(crate) fn apply(&mut self, outcome: Outcome, dependencies: IndexMap<NodeId, u64>) -> bool {
        let changed = match (&self.outcome, &outcome) {
            (Some(Ok(previous)), Ok(next)) => !self.def.equals(previous, next),
            (Some(Err(previous)), Err(next)) => !previous.same(next),
            _ => true,
        };
        if changed {
            self.outcome = Some(outcome);
            self.revision += 1;
        }
        self.dependencies = dependencies;
        self.invalidated = None;
        changed
    }
}
