//! Dependency Graph
//!
//! This module implements the incremental dependency graph: primitive nodes
//! hold values, computed nodes derive values from other nodes, and the graph
//! decides what has to run again after a write.
//!
//! # Overview
//!
//! - Nodes are definitions with a stable identity. State (value, revision,
//!   dependencies) lives in the [`Graph`], keyed by [`NodeId`].
//! - Every stored outcome carries a revision that moves only when the value
//!   (or error) actually changes under the node's equality.
//! - A node is *mounted* while it has a listener or a mounted dependent.
//!   Mounted nodes keep reverse edges and receive invalidation; unmounted
//!   nodes check their dependencies' revisions on every read instead.
//!
//! # Design Decisions
//!
//! 1. Dependencies are recorded per evaluation through an explicit
//!    [`Getter`], so conditional branches add and drop edges dynamically.
//!
//! 2. A write only marks dependents pending. Recomputation happens on read,
//!    and stops at the first node whose value turns out equal.
//!
//! 3. Mount bookkeeping is settled once per outermost operation, after
//!    which invalidation listeners are called with no borrows held.

mod context;
mod mount;
mod node;
mod state;
mod store;

pub use context::Getter;
pub use node::{AnyNode, AsNode, Node, NodeId, NodeKind, Writable};
pub use store::{Graph, Subscription};

pub(crate) use node::{ComputedDef, PrimitiveDef};
pub(crate) use state::{same_outcome, Outcome};
