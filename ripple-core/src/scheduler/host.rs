//! Scheduler hosts.
//!
//! A host adapts the [`Scheduler`](super::Scheduler) to whatever drives it:
//! an event loop, a UI frame, or a test. It supplies three primitives:
//!
//! - `schedule_flush`: run the given flush now or later.
//! - `batch_effects`: wrap one pass of effect tasks (for example in a UI
//!   framework's batching call).
//! - `on_error`: receive a failed task's error. Returning `Err` stops the
//!   flush and leaves the remaining tasks queued.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{error, warn};

use crate::error::{Error, Result};

/// A pending call to [`Scheduler::flush`](super::Scheduler::flush).
pub type Flush = Box<dyn FnOnce() -> Result<()>>;

/// The scheduling primitives a [`Scheduler`](super::Scheduler) is built on.
pub trait SchedulerHost {
    /// Arrange for `flush` to be called.
    fn schedule_flush(&self, flush: Flush);

    /// Run one pass of effect tasks.
    fn batch_effects(&self, run: &mut dyn FnMut()) {
        run()
    }

    /// Handle an error raised by a task.
    fn on_error(&self, error: Error) -> Result<()>;
}

impl<H: SchedulerHost + ?Sized> SchedulerHost for Rc<H> {
    fn schedule_flush(&self, flush: Flush) {
        (**self).schedule_flush(flush)
    }

    fn batch_effects(&self, run: &mut dyn FnMut()) {
        (**self).batch_effects(run)
    }

    fn on_error(&self, error: Error) -> Result<()> {
        (**self).on_error(error)
    }
}

/// Flushes synchronously, inside the call that scheduled the work.
///
/// Task errors are logged and swallowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateHost;

impl SchedulerHost for ImmediateHost {
    fn schedule_flush(&self, flush: Flush) {
        if let Err(err) = flush() {
            error!(error = %err, "flush failed");
        }
    }

    fn on_error(&self, err: Error) -> Result<()> {
        error!(error = %err, "task failed");
        Ok(())
    }
}

/// Queues flush requests until [`ManualHost::run`] is called.
///
/// Task errors are recorded for inspection.
#[derive(Default)]
pub struct ManualHost {
    flushes: RefCell<VecDeque<Flush>>,
    errors: RefCell<Vec<Error>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued flushes, including any requested while running, until none
    /// are left. Returns how many ran.
    pub fn run(&self) -> Result<usize> {
        let mut ran = 0;
        loop {
            let next = self.flushes.borrow_mut().pop_front();
            let Some(flush) = next else {
                return Ok(ran);
            };
            ran += 1;
            flush()?;
        }
    }

    pub fn pending_flushes(&self) -> usize {
        self.flushes.borrow().len()
    }

    /// Drain the errors reported so far.
    pub fn take_errors(&self) -> Vec<Error> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }
}

impl SchedulerHost for ManualHost {
    fn schedule_flush(&self, flush: Flush) {
        self.flushes.borrow_mut().push_back(flush);
    }

    fn on_error(&self, err: Error) -> Result<()> {
        warn!(error = %err, "task failed");
        self.errors.borrow_mut().push(err);
        Ok(())
    }
}

type ScheduleFlushHook = Box<dyn Fn(Flush)>;
type BatchEffectsHook = Box<dyn Fn(&mut dyn FnMut())>;
type OnErrorHook = Box<dyn Fn(Error) -> Result<()>>;

/// A host assembled from three closures.
pub struct HookHost {
    schedule_flush: ScheduleFlushHook,
    batch_effects: BatchEffectsHook,
    on_error: OnErrorHook,
}

impl HookHost {
    pub fn new(
        schedule_flush: impl Fn(Flush) + 'static,
        batch_effects: impl Fn(&mut dyn FnMut()) + 'static,
        on_error: impl Fn(Error) -> Result<()> + 'static,
    ) -> Self {
        Self {
            schedule_flush: Box::new(schedule_flush),
            batch_effects: Box::new(batch_effects),
            on_error: Box::new(on_error),
        }
    }
}

impl SchedulerHost for HookHost {
    fn schedule_flush(&self, flush: Flush) {
        (self.schedule_flush)(flush)
    }

    fn batch_effects(&self, run: &mut dyn FnMut()) {
        (self.batch_effects)(run)
    }

    fn on_error(&self, error: Error) -> Result<()> {
        (self.on_error)(error)
    }
}

/// Flushes on a task spawned onto the current [`tokio::task::LocalSet`].
///
/// Scheduling work outside a `LocalSet` panics, as `spawn_local` does.
#[cfg(feature = "tokio")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTaskHost;

#[cfg(feature = "tokio")]
impl SchedulerHost for LocalTaskHost {
    fn schedule_flush(&self, flush: Flush) {
        tokio::task::spawn_local(async move {
            if let Err(err) = flush() {
                error!(error = %err, "flush failed");
            }
        });
    }

    fn on_error(&self, err: Error) -> Result<()> {
        error!(error = %err, "task failed");
        Ok(())
    }
}
