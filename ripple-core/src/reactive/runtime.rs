//! Reactive Runtime
//!
//! The runtime bundles one [`Graph`], one [`Scheduler`] and the
//! [`ChangeSubscriber`] connecting them, and exposes them through the
//! [`Capability`] trait: `get`, `set` and `subscribe`.
//!
//! # How It Works
//!
//! 1. `get` reads through the graph, recomputing whatever is stale.
//!
//! 2. `set` writes a signal. Mounted dependents are marked pending and the
//!    trackers watching them schedule recompute tasks.
//!
//! 3. The scheduler host decides when to flush. During the flush each
//!    tracker re-reads its node and, if the value changed, schedules the
//!    subscribed callbacks as effects.
//!
//! # Thread Safety
//!
//! None of these types are `Send`. A runtime lives on the thread that
//! created it; other threads must hand work to that thread.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::graph::{AsNode, Graph, Node, Writable};
use crate::scheduler::{Scheduler, SchedulerHost};

use super::subscriber::{ChangeSubscriber, Listening};

/// The get/set/subscribe surface used by everything built on the core.
pub trait Capability {
    /// Current value of `node`, or its stored error.
    fn get<N: Node>(&self, node: &N) -> Result<N::Value>;

    /// Write a primitive node.
    fn set<N: Writable>(&self, node: &N, value: N::Value) -> Result<()>;

    /// Call `callback` after `node` changes. Drop the guard to stop.
    fn subscribe<N: AsNode>(
        &self,
        node: &N,
        callback: impl Fn() -> Result<()> + 'static,
    ) -> Result<Listening>;

    /// Read-modify-write of a primitive node.
    fn update<N: Writable>(&self, node: &N, f: impl FnOnce(N::Value) -> N::Value) -> Result<()> {
        let current = self.get(node)?;
        self.set(node, f(current))
    }
}

/// A graph, a scheduler, and the change subscriber wiring them together.
///
/// Cloning is cheap and yields a handle to the same runtime.
#[derive(Clone, Debug)]
pub struct Runtime {
    graph: Graph,
    subscriber: ChangeSubscriber,
}

impl Runtime {
    /// Create a runtime driven by `host`.
    pub fn new(host: impl SchedulerHost + 'static) -> Self {
        Self::with_config(host, RuntimeConfig::default())
    }

    pub fn with_config(host: impl SchedulerHost + 'static, config: RuntimeConfig) -> Self {
        let graph = Graph::new();
        let scheduler = Scheduler::with_config(host, config.scheduler);
        let subscriber = ChangeSubscriber::new(graph.clone(), scheduler);
        Self { graph, subscriber }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.subscriber.scheduler()
    }

    pub fn subscriber(&self) -> &ChangeSubscriber {
        &self.subscriber
    }

    /// Run `f` and flush once afterwards, however many writes it made.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.scheduler().batch(f)
    }

    /// Flush queued tasks now.
    pub fn flush(&self) -> Result<()> {
        self.scheduler().flush()
    }
}

impl Capability for Runtime {
    fn get<N: Node>(&self, node: &N) -> Result<N::Value> {
        self.graph.read(node)
    }

    fn set<N: Writable>(&self, node: &N, value: N::Value) -> Result<()> {
        self.graph.write(node, value)
    }

    fn subscribe<N: AsNode>(
        &self,
        node: &N,
        callback: impl Fn() -> Result<()> + 'static,
    ) -> Result<Listening> {
        self.subscriber.subscribe(node, callback)
    }
}
