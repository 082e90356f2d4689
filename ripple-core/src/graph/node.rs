//! Graph Nodes
//!
//! Node identities, node kinds, and the type-erased definitions the graph
//! evaluates. Typed handles (`Signal<T>`, `Memo<T>`) wrap an [`AnyNode`].

use std::any::{self, Any};
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::Getter;
use crate::error::{Error, EvalError, Result};

/// Unique identifier for a node definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A directly writable node. Its value comes from an initializer until
    /// the first write.
    Primitive,

    /// A node derived by reading other nodes.
    Computed,
}

/// A stored node value.
pub(crate) type Value = Rc<dyn Any>;

/// The erased view of a node definition used by the graph.
pub(crate) trait Definition {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    fn label(&self) -> Option<&str>;

    fn set_label(&self, label: String);

    /// Run the initializer (primitives) or compute closure (computed nodes).
    fn evaluate(&self, cx: &mut Getter<'_>) -> Result<Value>;

    /// Equality gate applied before bumping a revision.
    fn equals(&self, previous: &Value, next: &Value) -> bool;

    /// Whether `value` has the type this node stores.
    fn accepts(&self, value: &Value) -> bool;

    fn type_name(&self) -> &'static str;
}

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

fn erased_equals<T: 'static>(equals: &Equality<T>, previous: &Value, next: &Value) -> bool {
    match (previous.downcast_ref::<T>(), next.downcast_ref::<T>()) {
        (Some(previous), Some(next)) => equals(previous, next),
        _ => false,
    }
}

/// Definition of a primitive node.
pub(crate) struct PrimitiveDef<T> {
    id: NodeId,
    label: OnceCell<String>,
    init: Box<dyn Fn() -> Result<T, EvalError>>,
    equals: Equality<T>,
}

impl<T: 'static> PrimitiveDef<T> {
    pub(crate) fn new(
        init: impl Fn() -> Result<T, EvalError> + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self {
            id: NodeId::next(),
            label: OnceCell::new(),
            init: Box::new(init),
            equals: Box::new(equals),
        }
    }
}

impl<T: 'static> Definition for PrimitiveDef<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Primitive
    }

    fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }

    fn set_label(&self, label: String) {
        let _ = self.label.set(label);
    }

    fn evaluate(&self, _cx: &mut Getter<'_>) -> Result<Value> {
        let value = (self.init)()?;
        Ok(Rc::new(value))
    }

    fn equals(&self, previous: &Value, next: &Value) -> bool {
        erased_equals(&self.equals, previous, next)
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is::<T>()
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// Definition of a computed node.
pub(crate) struct ComputedDef<T> {
    id: NodeId,
    label: OnceCell<String>,
    compute: Box<dyn Fn(&mut Getter<'_>) -> Result<T>>,
    equals: Equality<T>,
}

impl<T: 'static> ComputedDef<T> {
    pub(crate) fn new(
        compute: impl Fn(&mut Getter<'_>) -> Result<T> + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self {
            id: NodeId::next(),
            label: OnceCell::new(),
            compute: Box::new(compute),
            equals: Box::new(equals),
        }
    }
}

impl<T: 'static> Definition for ComputedDef<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }

    fn set_label(&self, label: String) {
        let _ = self.label.set(label);
    }

    fn evaluate(&self, cx: &mut Getter<'_>) -> Result<Value> {
        let value = (self.compute)(cx)?;
        Ok(Rc::new(value))
    }

    fn equals(&self, previous: &Value, next: &Value) -> bool {
        erased_equals(&self.equals, previous, next)
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is::<T>()
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

/// A type-erased handle to any node definition.
///
/// Clones share identity with the handle they were taken from. Useful for
/// keeping heterogeneous nodes in one collection.
#[derive(Clone)]
pub struct AnyNode {
    def: Rc<dyn Definition>,
}

impl AnyNode {
    pub(crate) fn new(def: Rc<dyn Definition>) -> Self {
        Self { def }
    }

    pub(crate) fn def(&self) -> &Rc<dyn Definition> {
        &self.def
    }

    pub fn id(&self) -> NodeId {
        self.def.id()
    }

    pub fn kind(&self) -> NodeKind {
        self.def.kind()
    }

    /// The debug label, if one was set.
    pub fn label(&self) -> Option<&str> {
        self.def.label()
    }

    /// Set the debug label. Only the first label set on a definition sticks.
    pub(crate) fn set_label(&self, label: impl Into<String>) {
        self.def.set_label(label.into());
    }
}

impl PartialEq for AnyNode {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyNode {}

impl fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyNode")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("label", &self.label())
            .finish()
    }
}

/// Anything that refers to a node definition.
pub trait AsNode {
    fn as_any_node(&self) -> &AnyNode;

    fn id(&self) -> NodeId {
        self.as_any_node().id()
    }
}

impl AsNode for AnyNode {
    fn as_any_node(&self) -> &AnyNode {
        self
    }
}

/// A typed node handle that can be read.
pub trait Node: AsNode {
    type Value: Clone + 'static;
}

/// A typed node handle that accepts writes.
pub trait Writable: Node {}

/// View an erased value as `T`.
pub(crate) fn view<T: Clone + 'static>(node: NodeId, value: &Value) -> Result<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or(Error::TypeMismatch {
            node,
            expected: any::type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::next();
        let id2 = NodeId::next();
        assert_ne!(id1, id2);
        assert_eq!(NodeId::from(id1.raw()), id1);
    }

    #[test]
    fn equality_applies_to_matching_types() {
        let def = PrimitiveDef::new(|| Ok(1_i32), |a: &i32, b: &i32| a == b);
        let one: Value = Rc::new(1_i32);
        let other_one: Value = Rc::new(1_i32);
        let text: Value = Rc::new("1");
        assert!(def.equals(&one, &other_one));
        assert!(!def.equals(&one, &text));
        assert!(def.accepts(&one));
        assert!(!def.accepts(&text));
    }

    #[test]
    fn first_label_wins() {
        let node = AnyNode::new(Rc::new(PrimitiveDef::new(|| Ok(()), |_: &(), _: &()| true)));
        node.set_label("first");
        node.set_label("second");
        assert_eq!(node.label(), Some("first"));
        assert_eq!(node.kind(), NodeKind::Primitive);
    }

    #[test]
    fn view_reports_type_mismatch() {
        let value: Value = Rc::new(5_u8);
        let node = NodeId::from(1);
        assert_eq!(view::<u8>(node, &value).unwrap(), 5);
        assert!(matches!(
            view::<String>(node, &value),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
