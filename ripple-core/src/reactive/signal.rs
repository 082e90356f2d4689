//! Signal Implementation
//!
//! A Signal is the writable primitive node. It holds no value itself: the
//! handle is an identity plus an initializer, and each [`Graph`] that reads
//! it keeps its own state for it.
//!
//! # How Signals Work
//!
//! 1. The first read in a graph runs the initializer and stores the result
//!    at revision 1.
//!
//! 2. A write stores the new value. If it is equal to the current one, the
//!    revision does not move and nothing downstream is disturbed.
//!
//! 3. Otherwise every mounted dependent is marked pending and their
//!    listeners are called once the write returns.
//!
//! [`Graph`]: crate::graph::Graph

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::EvalError;
use crate::graph::{AnyNode, AsNode, Node, NodeId, PrimitiveDef, Writable};

/// A writable node holding a value of type `T`.
///
/// Cloning yields a handle to the same node.
///
/// # Example
///
/// ```rust,ignore
/// let graph = Graph::new();
/// let count = Signal::new(0);
///
/// graph.write(&count, 5)?;
/// assert_eq!(graph.read(&count)?, 5);
/// ```
pub struct Signal<T> {
    node: AnyNode,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Signal<T>
where
    T: Clone + 'static,
{
    /// Create a signal with an initial value, compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(value, T::eq)
    }

    /// Create a signal whose writes are gated by a custom equality.
    pub fn with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::from_def(PrimitiveDef::new(move || Ok(value.clone()), equals))
    }

    /// Create a signal whose initial value is produced lazily, on the first
    /// read in each graph.
    ///
    /// A failing initializer leaves the signal in an error state until it is
    /// written.
    pub fn from_fn(init: impl Fn() -> Result<T, EvalError> + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::from_def(PrimitiveDef::new(init, T::eq))
    }

    fn from_def(def: PrimitiveDef<T>) -> Self {
        Self {
            node: AnyNode::new(Rc::new(def)),
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

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.node.id())
            .field("label", &self.node.label())
            .finish()
    }
}

impl<T> AsNode for Signal<T> {
    fn as_any_node(&self) -> &AnyNode {
        &self.node
    }
}

impl<T: Clone + 'static> Node for Signal<T> {
    type Value = T;
}

impl<T: Clone + 'static> Writable for Signal<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};

    #[test]
    fn signal_ids_are_unique() {
        let a = Signal::new(1);
        let b = Signal::new(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn signal_get_and_write() {
        let graph = Graph::new();
        let signal = Signal::new(10);
        assert_eq!(graph.read(&signal).unwrap(), 10);

        graph.write(&signal, 20).unwrap();
        assert_eq!(graph.read(&signal).unwrap(), 20);
    }

    #[test]
    fn each_graph_keeps_its_own_value() {
        let first = Graph::new();
        let second = Graph::new();
        let signal = Signal::new("start".to_string());

        first.write(&signal, "changed".to_string()).unwrap();
        assert_eq!(first.read(&signal).unwrap(), "changed");
        assert_eq!(second.read(&signal).unwrap(), "start");
    }

    #[test]
    fn lazy_initializer_runs_once_per_graph() {
        let runs = Rc::new(std::cell::Cell::new(0));
        let signal = {
            let runs = runs.clone();
            Signal::from_fn(move || {
                runs.set(runs.get() + 1);
                Ok(vec![1, 2, 3])
            })
        };

        let graph = Graph::new();
        assert_eq!(graph.read(&signal).unwrap().len(), 3);
        assert_eq!(graph.read(&signal).unwrap().len(), 3);
        assert_eq!(runs.get(), 1);

        Graph::new().read(&signal).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn label_and_erasure() {
        let signal = Signal::new(0_u8).with_label("volume");
        let erased = signal.erase();
        assert_eq!(erased.label(), Some("volume"));
        assert_eq!(erased.kind(), NodeKind::Primitive);
        assert_eq!(erased, *signal.as_any_node());
    }
}
