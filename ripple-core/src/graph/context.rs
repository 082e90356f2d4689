//! Evaluation Context
//!
//! A [`Getter`] is handed to every compute closure. Reads through it resolve
//! the target node first and then record it as a dependency of the node being
//! evaluated, so the dependency set is whatever the closure actually touched
//! on this run.
//!
//! The getter is passed explicitly; there is no thread-local "current
//! computation".

use indexmap::IndexMap;

use super::node::{self, AnyNode, Node, NodeId, Value};
use super::store::Graph;
use crate::error::{Error, Result};

/// Dependency-recording accessor passed to compute closures.
pub struct Getter<'g> {
    graph: &'g Graph,
    node: NodeId,
    dependencies: IndexMap<NodeId, u64>,
}

impl<'g> Getter<'g> {
    pub(crate) fn new(graph: &'g Graph, node: NodeId) -> Self {
        Self {
            graph,
            node,
            dependencies: IndexMap::new(),
        }
    }

    /// The node being evaluated.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Read `node` and record it as a dependency.
    ///
    /// Reading the node under evaluation returns its stored value without
    /// recording an edge, and fails with [`Error::SelfReadBeforeValue`] if it
    /// has never held one.
    pub fn get<N: Node>(&mut self, node: &N) -> Result<N::Value> {
        let value = self.resolve(node.as_any_node(), true)?;
        node::view(node.id(), &value)
    }

    /// Read `node` without recording a dependency.
    pub fn peek<N: Node>(&mut self, node: &N) -> Result<N::Value> {
        let value = self.resolve(node.as_any_node(), false)?;
        node::view(node.id(), &value)
    }

    /// The value this node held before the current evaluation, if any.
    ///
    /// Use this for reducers that fold over their own previous value.
    pub fn previous<T: Clone + 'static>(&self) -> Result<Option<T>> {
        match self.graph.stored_value(self.node) {
            Some(Ok(value)) => node::view(self.node, &value).map(Some),
            _ => Ok(None),
        }
    }

    fn resolve(&mut self, target: &AnyNode, track: bool) -> Result<Value> {
        let id = target.id();
        if id == self.node {
            return match self.graph.stored_value(id) {
                Some(outcome) => outcome.map_err(Error::Evaluation),
                None => Err(Error::SelfReadBeforeValue { node: id }),
            };
        }

        self.graph.refresh(target.def())?;
        let (revision, outcome) = self.graph.snapshot(id)?;
        if track {
            self.dependencies.insert(id, revision);
        }
        outcome.map_err(Error::Evaluation)
    }

    pub(crate) fn into_dependencies(self) -> IndexMap<NodeId, u64> {
        self.dependencies
    }
}
