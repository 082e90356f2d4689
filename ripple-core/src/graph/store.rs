//! The Graph
//!
//! Owns node state, the mount table, and the pending set of nodes touched by
//! the operation in progress.
//!
//! # Reads
//!
//! `refresh` brings one node up to date:
//!
//! 1. A mounted node that is not pending is current. Return.
//! 2. Otherwise walk the dependencies recorded by the last evaluation. Mounted
//!    dependencies are refreshed only while pending; unmounted ones never get
//!    invalidated, so they are always refreshed.
//! 3. If every dependency still has the revision seen last time, keep the
//!    stored outcome and clear the pending mark.
//! 4. Otherwise evaluate again through a fresh [`Getter`] and store the result
//!    behind the equality gate.
//!
//! # Writes
//!
//! A write stores the value, and if it changed, marks every mounted dependent
//! (transitively) as pending. Nothing is recomputed at write time.
//!
//! # Pending pass
//!
//! Every node whose state is stored or invalidated during an outermost entry
//! point (`read`, `write`, `subscribe`, unsubscribe) is remembered along with
//! its dependency set at first touch. When the entry point returns, mounted
//! nodes get their reverse edges reconciled against their new dependency set,
//! and nodes marked for notification have their listeners called once.
//!
//! No `RefCell` borrow is held while user code (initializers, compute
//! closures, listeners) runs, so all of them may call back into the graph.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::Getter;
use super::mount::{Listener, ListenerId, MountTable, Mounted};
use super::node::{self, AnyNode, AsNode, Definition, Node, NodeId, NodeKind, Value, Writable};
use super::state::{NodeState, Outcome};
use crate::error::{Error, EvalError, Result};

type DependencyIds = SmallVec<[NodeId; 8]>;

/// A node touched during the current pass.
struct Touched {
    /// Dependency set when the node was first touched in this pass.
    previous: DependencyIds,
    /// Call the node's listeners when the pass ends.
    notify: bool,
}

#[derive(Default)]
struct Tables {
    states: HashMap<NodeId, NodeState>,
    mounts: MountTable,
    pending: IndexMap<NodeId, Touched>,
}

impl Tables {
    fn dependency_ids(&self, node: NodeId) -> DependencyIds {
        self.states
            .get(&node)
            .map(|state| state.dependencies.keys().copied().collect())
            .unwrap_or_default()
    }

    fn touch(&mut self, node: NodeId) {
        if !self.pending.contains_key(&node) {
            let previous = self.dependency_ids(node);
            self.pending.insert(
                node,
                Touched {
                    previous,
                    notify: false,
                },
            );
        }
    }

    fn touch_and_notify(&mut self, node: NodeId) {
        self.touch(node);
        if let Some(touched) = self.pending.get_mut(&node) {
            touched.notify = true;
        }
    }

    /// Mark every mounted dependent of `node`, transitively, as pending.
    fn invalidate_dependents(&mut self, node: NodeId) {
        let mut seen = HashSet::new();
        let mut stack = self.mounts.dependents_of(node);
        while let Some(dependent) = stack.pop() {
            if !seen.insert(dependent) {
                continue;
            }
            if let Some(state) = self.states.get_mut(&dependent) {
                state.invalidate();
            }
            self.touch_and_notify(dependent);
            trace!(node = %dependent, source = %node, "invalidate");
            stack.extend(self.mounts.dependents_of(dependent));
        }
    }

    fn attach(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(mounted) = self.mounts.get_mut(dependency) {
            mounted.dependents.insert(dependent);
        }
    }

    fn detach(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(mounted) = self.mounts.get_mut(dependency) {
            mounted.dependents.shift_remove(&dependent);
        }
        self.try_unmount(dependency);
    }

    /// Unmount `node` if nothing holds it, cascading to its dependencies.
    fn try_unmount(&mut self, node: NodeId) {
        let orphaned = self.mounts.get(node).is_some_and(Mounted::is_orphaned);
        if !orphaned {
            return;
        }
        self.mounts.remove(node);
        trace!(node = %node, "unmount");
        for dependency in self.dependency_ids(node) {
            self.detach(dependency, node);
        }
    }
}

#[derive(Default)]
struct GraphInner {
    tables: RefCell<Tables>,
    /// Nesting depth of entry points; the pending pass runs at depth zero.
    depth: Cell<usize>,
}

/// A dependency graph of primitive and computed nodes.
///
/// Cloning is cheap and yields a handle to the same graph. Graphs are
/// single-threaded (`!Send`).
#[derive(Clone, Default)]
pub struct Graph {
    inner: Rc<GraphInner>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value of `node` without subscribing to it.
    ///
    /// Recomputes whatever is stale. Returns the stored error if the node is
    /// in an error state.
    pub fn read<N: Node>(&self, node: &N) -> Result<N::Value> {
        let value = self.read_value(node.as_any_node())?;
        node::view(node.id(), &value)
    }

    pub(crate) fn read_value(&self, node: &AnyNode) -> Result<Value> {
        self.entry(|| {
            self.refresh(node.def())?;
            let (_, outcome) = self.snapshot(node.id())?;
            outcome.map_err(Error::Evaluation)
        })
    }

    /// Store a new value in a primitive node.
    pub fn write<N: Writable>(&self, node: &N, value: N::Value) -> Result<()> {
        self.write_value(node.as_any_node(), Rc::new(value))
    }

    /// Store a new value through an erased handle.
    ///
    /// Fails with [`Error::NotWritable`] for computed nodes and
    /// [`Error::TypeMismatch`] when `value` is not the node's type.
    pub fn write_any<V: Any>(&self, node: &AnyNode, value: V) -> Result<()> {
        self.write_value(node, Rc::new(value))
    }

    fn write_value(&self, node: &AnyNode, value: Value) -> Result<()> {
        let def = node.def();
        let id = def.id();
        if def.kind() != NodeKind::Primitive {
            return Err(Error::NotWritable { node: id });
        }
        if !def.accepts(&value) {
            return Err(Error::TypeMismatch {
                node: id,
                expected: def.type_name(),
            });
        }

        self.entry(|| {
            let changed = self.store(def, Ok(value), IndexMap::new());
            debug!(node = %id, label = ?def.label(), changed, "write");
            if changed {
                let mut tables = self.tables_mut();
                tables.touch_and_notify(id);
                tables.invalidate_dependents(id);
            }
            Ok(())
        })
    }

    /// Mount `node` and call `listener` whenever it may have changed.
    ///
    /// The listener is an invalidation signal: it fires once per write pass
    /// that reaches the node, before anything is recomputed. The returned
    /// [`Subscription`] unsubscribes when consumed or dropped; the last one
    /// on a node unmounts it along with any dependencies nothing else holds.
    pub fn subscribe<N: AsNode>(
        &self,
        node: &N,
        listener: impl Fn() + 'static,
    ) -> Result<Subscription> {
        let node = node.as_any_node();
        let id = node.id();
        let listener_id = ListenerId::next();
        let listener: Listener = Rc::new(listener);

        self.entry(|| {
            self.mount(node.def())?;
            if let Some(mounted) = self.tables_mut().mounts.get_mut(id) {
                mounted.listeners.insert(listener_id, listener);
            }
            Ok(())
        })?;

        Ok(Subscription {
            graph: Rc::downgrade(&self.inner),
            node: id,
            listener: listener_id,
            active: true,
        })
    }

    fn unsubscribe(&self, node: NodeId, listener: ListenerId) -> Result<()> {
        self.entry(|| {
            let removed = {
                let mut tables = self.tables_mut();
                let removed = tables
                    .mounts
                    .get_mut(node)
                    .and_then(|mounted| mounted.listeners.shift_remove(&listener));
                tables.try_unmount(node);
                removed
            };
            // Dropped outside the borrow: the closure may own graph handles.
            drop(removed);
            Ok(())
        })
    }

    /// Number of mounted nodes.
    pub fn mounted_count(&self) -> usize {
        self.tables().mounts.len()
    }

    /// Number of nodes with stored state.
    pub fn state_count(&self) -> usize {
        self.tables().states.len()
    }

    pub fn is_mounted<N: AsNode>(&self, node: &N) -> bool {
        self.tables().mounts.contains(node.id())
    }

    /// Current revision of `node`, or `None` if it was never evaluated.
    pub fn revision<N: AsNode>(&self, node: &N) -> Option<u64> {
        self.tables()
            .states
            .get(&node.id())
            .filter(|state| state.is_initialized())
            .map(|state| state.revision)
    }

    /// Release state of unmounted nodes that no handle outside the graph
    /// refers to. Returns the number of states released.
    ///
    /// Does nothing while called from inside an evaluation.
    pub fn sweep(&self) -> usize {
        if self.inner.depth.get() > 0 {
            return 0;
        }
        let mut released = 0;
        loop {
            let removed: Vec<NodeState> = {
                let mut tables = self.tables_mut();
                let Tables { states, mounts, .. } = &mut *tables;
                let unreferenced: Vec<NodeId> = states
                    .iter()
                    .filter(|(id, state)| !mounts.contains(**id) && Rc::strong_count(&state.def) == 1)
                    .map(|(id, _)| *id)
                    .collect();
                unreferenced
                    .iter()
                    .filter_map(|id| states.remove(id))
                    .collect()
            };
            if removed.is_empty() {
                break;
            }
            released += removed.len();
            // Dropping a definition can release handles that keep other
            // definitions alive, so go around again.
            drop(removed);
        }
        debug!(released, "sweep");
        released
    }

    /// Bring `def` up to date.
    pub(crate) fn refresh(&self, def: &Rc<dyn Definition>) -> Result<()> {
        let id = def.id();
        let recorded: Option<SmallVec<[(NodeId, u64); 8]>> = {
            let tables = self.tables();
            match tables.states.get(&id) {
                Some(state) if state.is_initialized() => {
                    if tables.mounts.contains(id) && !state.is_pending() {
                        return Ok(());
                    }
                    Some(
                        state
                            .dependencies
                            .iter()
                            .map(|(dependency, revision)| (*dependency, *revision))
                            .collect(),
                    )
                }
                _ => None,
            }
        };

        if let Some(recorded) = recorded {
            if !self.dependencies_changed(&recorded)? {
                if let Some(state) = self.tables_mut().states.get_mut(&id) {
                    state.invalidated = None;
                }
                trace!(node = %id, label = ?def.label(), "dependencies unchanged");
                return Ok(());
            }
        }

        self.recompute(def)
    }

    fn dependencies_changed(&self, recorded: &[(NodeId, u64)]) -> Result<bool> {
        for &(dependency, seen) in recorded {
            let (def, settle) = {
                let tables = self.tables();
                match tables.states.get(&dependency) {
                    Some(state) => (
                        state.def.clone(),
                        !tables.mounts.contains(dependency) || state.is_pending(),
                    ),
                    // Swept; its dependent has to evaluate again.
                    None => return Ok(true),
                }
            };
            if settle {
                self.refresh(&def)?;
            }
            let current = self.tables().states.get(&dependency).map(|state| state.revision);
            if current != Some(seen) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn recompute(&self, def: &Rc<dyn Definition>) -> Result<()> {
        let id = def.id();
        let mut cx = Getter::new(self, id);
        let result = def.evaluate(&mut cx);
        let dependencies = cx.into_dependencies();

        let outcome: Outcome = match result {
            Ok(value) => Ok(value),
            Err(error) if error.is_contract() => return Err(error),
            Err(Error::Evaluation(error)) => Err(error),
            Err(error) => Err(EvalError::new(error)),
        };
        let failed = outcome.is_err();
        let changed = self.store(def, outcome, dependencies);
        trace!(node = %id, label = ?def.label(), changed, failed, "recompute");
        Ok(())
    }

    /// Store an evaluation result. Returns whether the revision moved.
    fn store(
        &self,
        def: &Rc<dyn Definition>,
        outcome: Outcome,
        dependencies: IndexMap<NodeId, u64>,
    ) -> bool {
        let id = def.id();
        let mut tables = self.tables_mut();
        tables.touch(id);
        tables
            .states
            .entry(id)
            .or_insert_with(|| NodeState::new(def.clone()))
            .apply(outcome, dependencies)
    }

    fn mount(&self, def: &Rc<dyn Definition>) -> Result<()> {
        let id = def.id();
        if self.tables().mounts.contains(id) {
            return Ok(());
        }

        self.refresh(def)?;
        let dependencies: SmallVec<[Rc<dyn Definition>; 8]> = {
            let tables = self.tables();
            tables
                .dependency_ids(id)
                .into_iter()
                .filter_map(|dependency| tables.states.get(&dependency).map(|state| state.def.clone()))
                .collect()
        };
        for (mounted, dependency) in dependencies.iter().enumerate() {
            if let Err(err) = self.mount(dependency) {
                // Release the dependencies this node already holds.
                let mut tables = self.tables_mut();
                for attached in &dependencies[..mounted] {
                    tables.detach(attached.id(), id);
                }
                return Err(err);
            }
            self.tables_mut().attach(dependency.id(), id);
        }

        self.tables_mut().mounts.insert(id);
        trace!(node = %id, label = ?def.label(), "mount");
        Ok(())
    }

    /// The stored outcome of `node`, without refreshing it.
    pub(crate) fn stored_value(&self, node: NodeId) -> Option<Outcome> {
        self.tables()
            .states
            .get(&node)
            .and_then(|state| state.outcome.clone())
    }

    /// Revision and outcome of a node that was just refreshed.
    pub(crate) fn snapshot(&self, node: NodeId) -> Result<(u64, Outcome)> {
        let tables = self.tables();
        match tables.states.get(&node) {
            Some(NodeState {
                revision,
                outcome: Some(outcome),
                ..
            }) => Ok((*revision, outcome.clone())),
            _ => Err(Error::MissingState { node }),
        }
    }

    /// Run an entry point, then the pending pass if this is the outermost one.
    fn entry<R>(&self, op: impl FnOnce() -> Result<R>) -> Result<R> {
        let depth = &self.inner.depth;
        depth.set(depth.get() + 1);
        let result = op();
        depth.set(depth.get() - 1);
        if depth.get() > 0 {
            return result;
        }

        let flushed = self.flush_pending();
        let value = result?;
        flushed?;
        Ok(value)
    }

    fn flush_pending(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let touched = mem::take(&mut self.tables_mut().pending);
            if touched.is_empty() {
                return first_error.map_or(Ok(()), Err);
            }

            // Evaluations triggered by mounting must not start a nested pass.
            let depth = &self.inner.depth;
            depth.set(depth.get() + 1);
            let mut listeners = Vec::new();
            let reconciled = self.reconcile(touched, &mut listeners);
            depth.set(depth.get() - 1);

            if let Err(err) = reconciled {
                first_error.get_or_insert(err);
            }
            for listener in listeners {
                listener();
            }
        }
    }

    /// Update reverse edges of touched mounted nodes and collect the
    /// listeners to call.
    ///
    /// Every entry is reconciled even if mounting one of its new
    /// dependencies fails; the first such error is returned at the end.
    fn reconcile(
        &self,
        touched: IndexMap<NodeId, Touched>,
        listeners: &mut Vec<Listener>,
    ) -> Result<()> {
        let mut first_error = None;
        for (id, entry) in touched {
            let (added, removed) = {
                let tables = self.tables();
                if !tables.mounts.contains(id) {
                    continue;
                }
                let current = tables.dependency_ids(id);
                let added: SmallVec<[Rc<dyn Definition>; 4]> = current
                    .iter()
                    .filter(|dependency| !entry.previous.contains(dependency))
                    .filter_map(|dependency| tables.states.get(dependency).map(|state| state.def.clone()))
                    .collect();
                let removed: DependencyIds = entry
                    .previous
                    .iter()
                    .filter(|dependency| !current.contains(dependency))
                    .copied()
                    .collect();
                (added, removed)
            };

            for dependency in &added {
                match self.mount(dependency) {
                    Ok(()) => self.tables_mut().attach(dependency.id(), id),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }

            let mut tables = self.tables_mut();
            for dependency in removed {
                tables.detach(dependency, id);
            }
            if entry.notify {
                listeners.extend(tables.mounts.listeners_of(id));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn tables(&self) -> Ref<'_, Tables> {
        self.inner.tables.borrow()
    }

    fn tables_mut(&self) -> RefMut<'_, Tables> {
        self.inner.tables.borrow_mut()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Graph");
        match self.inner.tables.try_borrow() {
            Ok(tables) => out
                .field("states", &tables.states.len())
                .field("mounted", &tables.mounts.len())
                .field("pending", &tables.pending.len()),
            Err(_) => out.field("tables", &"<borrowed>"),
        };
        out.finish()
    }
}

/// Handle to an invalidation listener registered with [`Graph::subscribe`].
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    graph: Weak<GraphInner>,
    node: NodeId,
    listener: ListenerId,
    active: bool,
}

impl Subscription {
    /// The subscribed node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Unsubscribe now and report any failure from the resulting pass.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !mem::replace(&mut self.active, false) {
            return Ok(());
        }
        match self.graph.upgrade() {
            Some(inner) => Graph { inner }.unsubscribe(self.node, self.listener),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(node = %self.node, %error, "unsubscribe failed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("node", &self.node)
            .field("active", &self.active)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
