//! Change Subscriber
//!
//! Turns the graph's "may have changed" signal into "did change".
//!
//! # How It Works
//!
//! 1. The first external subscription to a node creates a tracker: the node
//!    is subscribed in the graph (which mounts it) and its current outcome
//!    is remembered.
//!
//! 2. When the graph invalidates the node, the tracker only schedules a
//!    recompute task. Nothing is read synchronously.
//!
//! 3. The recompute task reads the node. If the stored value (or error) is a
//!    different allocation from the remembered one, it is remembered instead
//!    and every callback is scheduled as an effect task.
//!
//! 4. Dropping the last [`Listening`] guard on a node removes the tracker and
//!    unsubscribes from the graph.
//!
//! Tasks already queued when a guard is dropped still run; they check
//! whether their tracker or callback is still alive and do nothing if not.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::graph::{same_outcome, AnyNode, AsNode, Graph, NodeId, Outcome, Subscription};
use crate::scheduler::{Scheduler, Task, TaskId};

struct Tracker {
    node: AnyNode,
    previous: Outcome,
    callbacks: IndexMap<TaskId, Task>,
    subscription: Subscription,
}

struct SubscriberInner {
    graph: Graph,
    scheduler: Scheduler,
    trackers: RefCell<HashMap<NodeId, Tracker>>,
}

/// Delivers change notifications for graph nodes through a [`Scheduler`].
///
/// Cloning is cheap and yields a handle to the same trackers.
#[derive(Clone)]
pub struct ChangeSubscriber {
    inner: Rc<SubscriberInner>,
}

impl ChangeSubscriber {
    pub fn new(graph: Graph, scheduler: Scheduler) -> Self {
        Self {
            inner: Rc::new(SubscriberInner {
                graph,
                scheduler,
                trackers: RefCell::default(),
            }),
        }
    }

    /// Call `callback` as an effect task whenever the value of `node`
    /// changes.
    ///
    /// Errors returned by the callback go to the scheduler host's
    /// `on_error`. Errors from mounting the node (contract errors only; a
    /// failing evaluation counts as a value) are returned here.
    pub fn subscribe<N: AsNode>(
        &self,
        node: &N,
        callback: impl Fn() -> Result<()> + 'static,
    ) -> Result<Listening> {
        let node = node.as_any_node();
        let id = node.id();

        let alive = Rc::new(Cell::new(true));
        let task = {
            let alive = alive.clone();
            Task::new(move || if alive.get() { callback() } else { Ok(()) })
        };
        let key = task.id();

        let added = match self.inner.trackers.borrow_mut().get_mut(&id) {
            Some(tracker) => {
                tracker.callbacks.insert(key, task.clone());
                true
            }
            None => false,
        };
        if !added {
            self.inner.track(node, key, task)?;
        }

        Ok(Listening {
            subscriber: Rc::downgrade(&self.inner),
            node: id,
            key,
            alive,
        })
    }

    /// Number of nodes with at least one callback.
    pub fn tracked_count(&self) -> usize {
        self.inner.trackers.borrow().len()
    }

    /// Number of callbacks registered on `node`.
    pub fn callback_count<N: AsNode>(&self, node: &N) -> usize {
        self.inner
            .trackers
            .borrow()
            .get(&node.id())
            .map_or(0, |tracker| tracker.callbacks.len())
    }

    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }
}

impl fmt::Debug for ChangeSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.inner.trackers.try_borrow().map(|t| t.len()).ok();
        f.debug_struct("ChangeSubscriber")
            .field("tracked", &tracked)
            .finish()
    }
}

impl SubscriberInner {
    fn track(self: &Rc<Self>, node: &AnyNode, key: TaskId, callback: Task) -> Result<()> {
        let id = node.id();
        let recompute = {
            let subscriber = Rc::downgrade(self);
            Task::new(move || match subscriber.upgrade() {
                Some(inner) => inner.recompute(id),
                None => Ok(()),
            })
        };

        let subscription = {
            let scheduler = self.scheduler.clone();
            self.graph
                .subscribe(node, move || scheduler.schedule_compute(recompute.clone()))?
        };
        let previous = read_outcome(&self.graph, node)?;

        let mut callbacks = IndexMap::new();
        callbacks.insert(key, callback);
        let replaced = self.trackers.borrow_mut().insert(
            id,
            Tracker {
                node: node.clone(),
                previous,
                callbacks,
                subscription,
            },
        );
        drop(replaced);
        trace!(node = %id, label = ?node.label(), "tracking");
        Ok(())
    }

    fn recompute(&self, id: NodeId) -> Result<()> {
        let node = match self.trackers.borrow().get(&id) {
            Some(tracker) => tracker.node.clone(),
            None => return Ok(()),
        };
        let outcome = read_outcome(&self.graph, &node)?;

        let callbacks: Vec<Task> = {
            let mut trackers = self.trackers.borrow_mut();
            let Some(tracker) = trackers.get_mut(&id) else {
                return Ok(());
            };
            if same_outcome(&tracker.previous, &outcome) {
                trace!(node = %id, "unchanged");
                return Ok(());
            }
            // The replaced value is dropped after the borrow ends.
            let previous = mem::replace(&mut tracker.previous, outcome);
            let callbacks = tracker.callbacks.values().cloned().collect();
            drop(trackers);
            drop(previous);
            callbacks
        };

        trace!(node = %id, callbacks = callbacks.len(), "changed");
        for callback in callbacks {
            self.scheduler.schedule_effect(callback);
        }
        Ok(())
    }

    fn remove(&self, id: NodeId, key: TaskId) -> Result<()> {
        let (callback, tracker) = {
            let mut trackers = self.trackers.borrow_mut();
            let Some(tracker) = trackers.get_mut(&id) else {
                return Ok(());
            };
            let callback = tracker.callbacks.shift_remove(&key);
            let emptied = if tracker.callbacks.is_empty() {
                trackers.remove(&id)
            } else {
                None
            };
            (callback, emptied)
        };
        drop(callback);

        match tracker {
            Some(tracker) => {
                trace!(node = %id, "untracking");
                tracker.subscription.unsubscribe()
            }
            None => Ok(()),
        }
    }
}

/// Current outcome of `node`, with evaluation errors as values.
fn read_outcome(graph: &Graph, node: &AnyNode) -> Result<Outcome> {
    match graph.read_value(node) {
        Ok(value) => Ok(Ok(value)),
        Err(Error::Evaluation(error)) => Ok(Err(error)),
        Err(error) => Err(error),
    }
}

/// Guard for a callback registered with [`ChangeSubscriber::subscribe`].
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Listening guard unsubscribes immediately"]
pub struct Listening {
    subscriber: Weak<SubscriberInner>,
    node: NodeId,
    key: TaskId,
    alive: Rc<Cell<bool>>,
}

impl Listening {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Unsubscribe now and report any failure from unmounting.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.alive.replace(false) {
            return Ok(());
        }
        match self.subscriber.upgrade() {
            Some(inner) => inner.remove(self.node, self.key),
            None => Ok(()),
        }
    }
}

impl Drop for Listening {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(node = %self.node, %error, "unsubscribe failed");
        }
    }
}

impl fmt::Debug for Listening {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listening")
            .field("node", &self.node)
            .field("active", &self.alive.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::reactive::{Memo, Signal};
    use crate::scheduler::ManualHost;

    struct Fixture {
        host: Rc<ManualHost>,
        graph: Graph,
        subscriber: ChangeSubscriber,
    }

    fn fixture() -> Fixture {
        let host = Rc::new(ManualHost::new());
        let graph = Graph::new();
        let subscriber = ChangeSubscriber::new(graph.clone(), Scheduler::new(host.clone()));
        Fixture {
            host,
            graph,
            subscriber,
        }
    }

    fn counting(count: &Rc<Cell<u32>>) -> impl Fn() -> Result<()> + 'static {
        let count = count.clone();
        move || {
            count.set(count.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn callback_runs_after_flush_only_on_change() {
        let fx = fixture();
        let base = Signal::new(1);
        let parity = {
            let base = base.clone();
            Memo::new(move |cx| Ok(cx.get(&base)? % 2))
        };
        let calls = Rc::new(Cell::new(0));
        let _listening = fx.subscriber.subscribe(&parity, counting(&calls)).unwrap();

        fx.graph.write(&base, 3).unwrap();
        assert_eq!(fx.subscriber.scheduler().pending_computes(), 1);
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 0);

        fx.graph.write(&base, 4).unwrap();
        assert_eq!(calls.get(), 0);
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn recompute_task_is_shared_per_node() {
        let fx = fixture();
        let base = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let _first = fx.subscriber.subscribe(&base, counting(&calls)).unwrap();
        let _second = fx.subscriber.subscribe(&base, counting(&calls)).unwrap();
        assert_eq!(fx.subscriber.tracked_count(), 1);
        assert_eq!(fx.subscriber.callback_count(&base), 2);

        fx.graph.write(&base, 1).unwrap();
        fx.graph.write(&base, 2).unwrap();
        assert_eq!(fx.subscriber.scheduler().pending_computes(), 1);

        fx.host.run().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn last_guard_unmounts() {
        let fx = fixture();
        let base = Signal::new(0);
        let doubled = {
            let base = base.clone();
            Memo::new(move |cx| Ok(cx.get(&base)? * 2))
        };

        let first = fx.subscriber.subscribe(&doubled, || Ok(())).unwrap();
        let second = fx.subscriber.subscribe(&doubled, || Ok(())).unwrap();
        assert_eq!(fx.graph.mounted_count(), 2);

        first.unsubscribe().unwrap();
        assert_eq!(fx.graph.mounted_count(), 2);
        drop(second);
        assert_eq!(fx.graph.mounted_count(), 0);
        assert_eq!(fx.subscriber.tracked_count(), 0);
    }

    #[test]
    fn dropped_guard_silences_queued_callback() {
        let fx = fixture();
        let base = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let keep = fx.subscriber.subscribe(&base, || Ok(())).unwrap();
        let listening = fx.subscriber.subscribe(&base, counting(&calls)).unwrap();

        fx.graph.write(&base, 1).unwrap();
        drop(listening);
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 0);
        drop(keep);
    }

    #[test]
    fn error_transitions_notify() {
        let fx = fixture();
        let fail = Signal::new(false);
        let guarded = {
            let fail = fail.clone();
            Memo::new(move |cx| {
                if cx.get(&fail)? {
                    Err(EvalError::msg("failed").into())
                } else {
                    Ok(1)
                }
            })
        };
        let calls = Rc::new(Cell::new(0));
        let _listening = fx.subscriber.subscribe(&guarded, counting(&calls)).unwrap();

        fx.graph.write(&fail, true).unwrap();
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 1);
        assert!(fx.graph.read(&guarded).is_err());

        fx.graph.write(&fail, false).unwrap();
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn subscribing_to_a_failing_node_succeeds() {
        let fx = fixture();
        let broken: Signal<u8> = Signal::from_fn(|| Err(EvalError::msg("unavailable")));
        let calls = Rc::new(Cell::new(0));
        let _listening = fx.subscriber.subscribe(&broken, counting(&calls)).unwrap();

        fx.graph.write(&broken, 1).unwrap();
        fx.host.run().unwrap();
        assert_eq!(calls.get(), 1);
    }
}
