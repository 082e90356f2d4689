//! Scheduler tasks.
//!
//! A task is a callback with an identity. Queues are keyed by [`TaskId`], so
//! scheduling the same task twice before it runs queues it once.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A unit of work for the [`Scheduler`](super::Scheduler).
///
/// Clones share the task's identity.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    run: Rc<dyn Fn() -> Result<()>>,
}

impl Task {
    pub fn new(run: impl Fn() -> Result<()> + 'static) -> Self {
        Self {
            id: TaskId::next(),
            run: Rc::new(run),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn run(&self) -> Result<()> {
        (self.run)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}
