//! Mount registry.
//!
//! A node is mounted while it has at least one listener or at least one
//! mounted dependent. Only mounted nodes receive invalidation.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use super::node::NodeId;

/// Identifies one registered invalidation listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type Listener = Rc<dyn Fn()>;

/// Reverse edges and listeners of one mounted node.
#[derive(Default)]
pub(crate) struct Mounted {
    pub(crate) dependents: IndexSet<NodeId>,
    pub(crate) listeners: IndexMap<ListenerId, Listener>,
}

impl Mounted {
    pub(crate) fn is_orphaned(&self) -> bool {
        self.dependents.is_empty() && self.listeners.is_empty()
    }
}

/// All mounted nodes of a graph.
#[derive(Default)]
pub(crate) struct MountTable {
    entries: HashMap<NodeId, Mounted>,
}

impl MountTable {
    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    pub(crate) fn get(&self, node: NodeId) -> Option<&Mounted> {
        self.entries.get(&node)
    }

    pub(crate) fn get_mut(&mut self, node: NodeId) -> Option<&mut Mounted> {
        self.entries.get_mut(&node)
    }

    /// Create an empty entry unless one exists.
    pub(crate) fn insert(&mut self, node: NodeId) {
        self.entries.entry(node).or_default();
    }

    pub(crate) fn remove(&mut self, node: NodeId) -> Option<Mounted> {
        self.entries.remove(&node)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Dependents of `node` in registration order.
    pub(crate) fn dependents_of(&self, node: NodeId) -> Vec<NodeId> {
        self.entries
            .get(&node)
            .map(|mounted| mounted.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Listeners of `node` in registration order.
    pub(crate) fn listeners_of(&self, node: NodeId) -> Vec<Listener> {
        self.entries
            .get(&node)
            .map(|mounted| mounted.listeners.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut table = MountTable::default();
        let node = NodeId::from(1);
        table.insert(node);
        table
            .get_mut(node)
            .unwrap()
            .dependents
            .insert(NodeId::from(2));
        table.insert(node);
        assert_eq!(table.len(), 1);
        assert_eq!(table.dependents_of(node), vec![NodeId::from(2)]);
    }

    #[test]
    fn orphaned_without_dependents_or_listeners() {
        let mut mounted = Mounted::default();
        assert!(mounted.is_orphaned());

        let id = ListenerId::next();
        mounted.listeners.insert(id, Rc::new(|| {}));
        assert!(!mounted.is_orphaned());

        mounted.listeners.shift_remove(&id);
        mounted.dependents.insert(NodeId::from(9));
        assert!(!mounted.is_orphaned());
    }
}
