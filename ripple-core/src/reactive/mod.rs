//! Reactive Primitives
//!
//! Typed node handles, the change subscriber, and the runtime that exposes
//! them to applications.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a writable node. Writing an equal value is a no-op;
//! writing a different one invalidates every mounted node that read it.
//!
//! ## Memos
//!
//! A [`Memo`] is a derived node. Its compute closure receives a
//! [`Getter`](crate::graph::Getter) and whatever it reads through it becomes
//! a dependency for that run. The result is cached until a dependency's
//! revision moves.
//!
//! ## Subscriptions
//!
//! The graph only knows that a node *may* have changed. The
//! [`ChangeSubscriber`] re-reads subscribed nodes from a scheduled compute
//! task and runs callbacks, as effect tasks, only when the value actually
//! changed.
//!
//! # Implementation Notes
//!
//! There is no ambient tracking context. Dependencies are recorded by the
//! getter passed into each evaluation, and every operation names the graph
//! or runtime it acts on.

mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use memo::Memo;
pub use runtime::{Capability, Runtime};
pub use signal::Signal;
pub use subscriber::{ChangeSubscriber, Listening};
