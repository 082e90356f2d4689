//! Ripple Core
//!
//! This crate provides an incremental reactive dependency graph and the
//! scheduler that delivers its change notifications. It implements:
//!
//! - Writable and derived nodes with per-node equality
//! - Dynamic dependency tracking and revision-based memoization
//! - Reference-counted mounting of the nodes someone is listening to
//! - A two-queue (compute, then effect) flush scheduler behind a pluggable
//!   host
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node definitions, per-node state, and the [`Graph`](graph::Graph)
//! - `reactive`: typed handles, the change subscriber, and the runtime
//! - `scheduler`: task queues and scheduler hosts
//! - `config`: serde-loadable runtime settings
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::{Capability, Memo, Runtime, Signal};
//! use ripple_core::scheduler::ImmediateHost;
//!
//! let runtime = Runtime::new(ImmediateHost);
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Memo::new(move |cx| Ok(cx.get(&count)? * 2))
//! };
//!
//! // Get notified when it changes
//! let _listening = runtime.subscribe(&doubled, || {
//!     println!("doubled changed");
//!     Ok(())
//! })?;
//!
//! // Update the signal
//! runtime.set(&count, 5)?;
//! // Prints: "doubled changed"
//! assert_eq!(runtime.get(&doubled)?, 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod scheduler;

pub use error::{Error, EvalError, Result};
