//! Memo Implementation
//!
//! A Memo is a computed node: a pure function of other nodes, cached by the
//! graph and re-evaluated only when something it read last time changed.
//!
//! # How Memos Work
//!
//! 1. On first read, the compute closure runs with a [`Getter`]. Every node
//!    it reads through the getter becomes a dependency, along with the
//!    revision that node had.
//!
//! 2. When a dependency changes, a mounted memo is marked pending. Nothing
//!    runs yet.
//!
//! 3. On the next read, the memo brings its dependencies up to date and
//!    compares revisions. If none moved, the cached value is kept.
//!
//! 4. If any moved, the closure runs again. An equal result keeps the old
//!    revision, which stops the change from travelling further.
//!
//! Dependencies are recorded per run, so a memo that branches only depends
//! on the branch it took.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{AnyNode, AsNode, ComputedDef, Getter, Node, NodeId};

/// A cached derived value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let doubled = {
///     let count = count.clone();
///     Memo::new(move |cx| Ok(cx.get(&count)? * 2))
/// };
/// assert_eq!(graph.read(&doubled)?, 4);
/// ```
pub struct Memo<T> {
    node: AnyNode,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Memo<T>
where
    T: Clone + 'static,
{
    /// Create a memo whose results are compared with `PartialEq`.
    ///
    /// The closure does not run until the memo is first read.
    pub fn new(compute: impl Fn(&mut Getter<'_>) -> Result<T> + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(compute, T::eq)
    }

    /// Create a memo with a custom equality.
    ///
    /// Use this for values without `PartialEq`, or to treat results that
    /// differ in irrelevant ways as unchanged.
    pub fn with_equals(
        compute: impl Fn(&mut Getter<'_>) -> Result<T> + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self {
            node: AnyNode::new(Rc::new(ComputedDef::new(compute, equals))),
            _marker: PhantomData,
        }
    }

    /// Attach a debug label, shown in logs. Only the first label sticks.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.node.set_label(label);
        self
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    pub fn label(&self) -> Option<&str> {
        self.node.label()
    }

    /// Erase the value type.
    pub fn erase(&self) -> AnyNode {
        self.node.clone()
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.node.id())
            .field("label", &self.node.label())
            .finish()
    }
}

impl<T> AsNode for Memo<T> {
    fn as_any_node(&self) -> &AnyNode {
        &self.node
    }
}

impl<T: Clone + 'static> Node for Memo<T> {
    type Value = T;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};
    use crate::reactive::Signal;
    use std::cell::Cell;

    #[test]
    fn memo_computes_lazily() {
        let runs = Rc::new(Cell::new(0));
        let memo = {
            let runs = runs.clone();
            Memo::new(move |_| {
                runs.set(runs.get() + 1);
                Ok(42)
            })
        };
        assert_eq!(runs.get(), 0);

        let graph = Graph::new();
        assert_eq!(graph.read(&memo).unwrap(), 42);
        assert_eq!(graph.read(&memo).unwrap(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn memo_chain() {
        let graph = Graph::new();
        let base = Signal::new(1);
        let doubled = {
            let base = base.clone();
            Memo::new(move |cx| Ok(cx.get(&base)? * 2))
        };
        let quadrupled = {
            let doubled = doubled.clone();
            Memo::new(move |cx| Ok(cx.get(&doubled)? * 2))
        };

        assert_eq!(graph.read(&quadrupled).unwrap(), 4);
        graph.write(&base, 5).unwrap();
        assert_eq!(graph.read(&quadrupled).unwrap(), 20);
    }

    #[test]
    fn custom_equality_keeps_revision() {
        #[derive(Clone)]
        struct Reading {
            value: f64,
        }

        let graph = Graph::new();
        let raw = Signal::new(1.0_f64);
        let rounded = {
            let raw = raw.clone();
            Memo::with_equals(
                move |cx| Ok(Reading { value: cx.get(&raw)? }),
                |a: &Reading, b: &Reading| a.value.round() == b.value.round(),
            )
        };

        graph.read(&rounded).unwrap();
        let revision = graph.revision(&rounded);

        graph.write(&raw, 1.2).unwrap();
        let reading = graph.read(&rounded).unwrap();
        assert_eq!(reading.value, 1.0);
        assert_eq!(graph.revision(&rounded), revision);
    }

    #[test]
    fn memo_is_computed_kind() {
        let memo = Memo::new(|_| Ok(())).with_label("unit");
        assert_eq!(memo.erase().kind(), NodeKind::Computed);
        assert_eq!(memo.label(), Some("unit"));
    }
}
