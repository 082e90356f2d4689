//! Update Scheduler
//!
//! Two queues of deferred work and one flush loop.
//!
//! # Algorithm
//!
//! Scheduling a task adds it to the compute or effect queue and, unless a
//! flush is already pending, hands a flush to the host. A flush repeats:
//!
//! 1. Take the whole compute queue and run it. Tasks scheduled while it runs
//!    land in the queues for the next pass.
//! 2. Take the whole effect queue and run it inside one
//!    [`SchedulerHost::batch_effects`] call.
//!
//! until both queues are empty. Compute tasks scheduled by effects therefore
//! run in the same flush, in the next pass, never in the middle of an effect
//! batch.
//!
//! A failing task is reported to [`SchedulerHost::on_error`] and the rest of
//! its batch still runs. If `on_error` itself returns an error, the flush
//! stops there: the tasks that did not run go back to the front of their
//! queue and wait for the next flush.

mod host;
mod task;

pub use host::{Flush, HookHost, ImmediateHost, ManualHost, SchedulerHost};
#[cfg(feature = "tokio")]
pub use host::LocalTaskHost;
pub use task::{Task, TaskId};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

type Queue = IndexMap<TaskId, Task>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Compute,
    Effect,
}

#[derive(Default)]
struct Queues {
    compute: Queue,
    effect: Queue,
}

impl Queues {
    fn lane_mut(&mut self, lane: Lane) -> &mut Queue {
        match lane {
            Lane::Compute => &mut self.compute,
            Lane::Effect => &mut self.effect,
        }
    }
}

struct SchedulerInner {
    host: Box<dyn SchedulerHost>,
    config: SchedulerConfig,
    queues: RefCell<Queues>,
    /// A flush is requested from the host, running, or held off by `batch`.
    scheduled: Cell<bool>,
    flushing: Cell<bool>,
}

/// The two-queue task scheduler.
///
/// Cloning is cheap and yields a handle to the same queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(host: impl SchedulerHost + 'static) -> Self {
        Self::with_config(host, SchedulerConfig::default())
    }

    pub fn with_config(host: impl SchedulerHost + 'static, config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                host: Box::new(host),
                config,
                queues: RefCell::default(),
                scheduled: Cell::new(false),
                flushing: Cell::new(false),
            }),
        }
    }

    /// Queue a compute task. A task already queued is not queued again.
    pub fn schedule_compute(&self, task: Task) {
        self.enqueue(Lane::Compute, task);
    }

    /// Queue an effect task. A task already queued is not queued again.
    pub fn schedule_effect(&self, task: Task) {
        self.enqueue(Lane::Effect, task);
    }

    fn enqueue(&self, lane: Lane, task: Task) {
        self.inner
            .queues
            .borrow_mut()
            .lane_mut(lane)
            .entry(task.id())
            .or_insert(task);
        self.request_flush();
    }

    fn request_flush(&self) {
        if self.inner.scheduled.replace(true) {
            return;
        }
        let scheduler = Rc::downgrade(&self.inner);
        self.inner.host.schedule_flush(Box::new(move || match scheduler.upgrade() {
            Some(inner) => Scheduler { inner }.flush(),
            None => Ok(()),
        }));
    }

    /// Run queued tasks until both queues are empty.
    ///
    /// Calling this from inside a running task does nothing; the running
    /// flush picks the new work up.
    pub fn flush(&self) -> Result<()> {
        if self.inner.flushing.replace(true) {
            return Ok(());
        }
        self.inner.scheduled.set(true);
        let result = self.drain();
        self.inner.flushing.set(false);
        self.inner.scheduled.set(false);
        result
    }

    fn drain(&self) -> Result<()> {
        let mut passes: u32 = 0;
        let mut ran = 0;
        loop {
            let (computes, effects) = self.queue_lengths();
            if computes == 0 && effects == 0 {
                break;
            }
            if let Some(max) = self.inner.config.max_passes {
                if passes >= max {
                    warn!(passes, computes, effects, "flush pass limit reached");
                    return self.inner.host.on_error(Error::FlushLimit { passes });
                }
            }
            passes += 1;
            ran += computes + effects;

            let computes = self.take(Lane::Compute);
            self.run_batch(Lane::Compute, computes)?;

            let effects = self.take(Lane::Effect);
            if !effects.is_empty() {
                let mut pending = Some(effects);
                let mut result = Ok(());
                self.inner.host.batch_effects(&mut || {
                    if let Some(effects) = pending.take() {
                        result = self.run_batch(Lane::Effect, effects);
                    }
                });
                // A host that never ran the batch keeps the effects queued.
                if let Some(effects) = pending {
                    self.requeue(Lane::Effect, effects.into_values());
                }
                result?;
            }
        }
        if self.inner.config.log_flushes && passes > 0 {
            debug!(passes, tasks = ran, "flush finished");
        }
        Ok(())
    }

    fn run_batch(&self, lane: Lane, batch: Queue) -> Result<()> {
        let mut tasks = batch.into_values();
        while let Some(task) = tasks.next() {
            let Err(err) = task.run() else {
                continue;
            };
            if let Err(escalated) = self.inner.host.on_error(err) {
                self.requeue(lane, tasks);
                return Err(escalated);
            }
        }
        Ok(())
    }

    /// Put unexecuted tasks back ahead of anything queued since.
    fn requeue(&self, lane: Lane, tasks: impl Iterator<Item = Task>) {
        let mut queues = self.inner.queues.borrow_mut();
        let queue = queues.lane_mut(lane);
        let mut restored: Queue = tasks.map(|task| (task.id(), task)).collect();
        for (id, task) in mem::take(queue) {
            restored.entry(id).or_insert(task);
        }
        *queue = restored;
    }

    fn take(&self, lane: Lane) -> Queue {
        mem::take(self.inner.queues.borrow_mut().lane_mut(lane))
    }

    fn queue_lengths(&self) -> (usize, usize) {
        let queues = self.inner.queues.borrow();
        (queues.compute.len(), queues.effect.len())
    }

    /// Run `f` without letting it trigger a flush, then request one flush
    /// for whatever it scheduled.
    ///
    /// Nested inside another batch or a running flush, `f` just runs.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.inner.scheduled.replace(true) {
            return f();
        }
        let value = f();
        self.inner.scheduled.set(false);
        let (computes, effects) = self.queue_lengths();
        if computes + effects > 0 {
            self.request_flush();
        }
        value
    }

    pub fn pending_computes(&self) -> usize {
        self.queue_lengths().0
    }

    pub fn pending_effects(&self) -> usize {
        self.queue_lengths().1
    }

    /// Whether a flush is requested from the host or running.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduled.get()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (computes, effects) = self
            .inner
            .queues
            .try_borrow()
            .map(|queues| (queues.compute.len(), queues.effect.len()))
            .unwrap_or_default();
        f.debug_struct("Scheduler")
            .field("computes", &computes)
            .field("effects", &effects)
            .field("scheduled", &self.inner.scheduled.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn logging(log: &Log, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(move || {
            log.borrow_mut().push(name);
            Ok(())
        })
    }

    #[test]
    fn one_flush_request_per_batch_of_work() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        scheduler.schedule_effect(logging(&log, "a"));
        scheduler.schedule_compute(logging(&log, "b"));
        assert_eq!(host.pending_flushes(), 1);
        assert!(scheduler.is_flush_scheduled());
        assert!(log.borrow().is_empty());

        host.run().unwrap();
        assert_eq!(*log.borrow(), vec!["b", "a"]);
        assert!(!scheduler.is_flush_scheduled());
    }

    #[test]
    fn same_task_is_queued_once() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();
        let task = logging(&log, "once");

        scheduler.schedule_effect(task.clone());
        scheduler.schedule_effect(task);
        assert_eq!(scheduler.pending_effects(), 1);

        host.run().unwrap();
        assert_eq!(*log.borrow(), vec!["once"]);
    }

    #[test]
    fn compute_scheduled_by_effect_runs_in_same_flush() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        let follow_up = logging(&log, "follow-up compute");
        let effect = {
            let (scheduler, log) = (scheduler.clone(), log.clone());
            Task::new(move || {
                log.borrow_mut().push("effect");
                scheduler.schedule_compute(follow_up.clone());
                Ok(())
            })
        };
        scheduler.schedule_effect(effect);

        assert_eq!(host.run().unwrap(), 1);
        assert_eq!(*log.borrow(), vec!["effect", "follow-up compute"]);
        assert_eq!(host.pending_flushes(), 0);
    }

    #[test]
    fn compute_scheduled_by_compute_runs_after_queued_effects() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        let follow_up = logging(&log, "B");
        let compute = {
            let (scheduler, log) = (scheduler.clone(), log.clone());
            Task::new(move || {
                log.borrow_mut().push("A");
                scheduler.schedule_compute(follow_up.clone());
                Ok(())
            })
        };
        scheduler.schedule_effect(logging(&log, "E"));
        scheduler.schedule_compute(compute);

        assert_eq!(host.run().unwrap(), 1);
        assert_eq!(*log.borrow(), vec!["A", "E", "B"]);
        assert_eq!(host.pending_flushes(), 0);
        assert_eq!(scheduler.pending_computes(), 0);
    }

    #[test]
    fn effects_wait_for_computes() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        scheduler.schedule_effect(logging(&log, "effect 1"));
        scheduler.schedule_compute(logging(&log, "compute 1"));
        scheduler.schedule_effect(logging(&log, "effect 2"));
        scheduler.schedule_compute(logging(&log, "compute 2"));

        host.run().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["compute 1", "compute 2", "effect 1", "effect 2"]
        );
    }

    #[test]
    fn failing_task_does_not_stop_siblings() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        scheduler.schedule_effect(Task::new(|| Err(EvalError::msg("broken").into())));
        scheduler.schedule_effect(logging(&log, "sibling"));

        host.run().unwrap();
        assert_eq!(*log.borrow(), vec!["sibling"]);
        assert_eq!(host.take_errors().len(), 1);
    }

    #[test]
    fn rethrowing_on_error_leaves_remaining_tasks_queued() {
        let flushes: Rc<RefCell<Vec<Flush>>> = Rc::default();
        let host = {
            let flushes = flushes.clone();
            HookHost::new(
                move |flush| flushes.borrow_mut().push(flush),
                |run| run(),
                Err,
            )
        };
        let scheduler = Scheduler::new(host);
        let log = Log::default();

        scheduler.schedule_effect(Task::new(|| Err(EvalError::msg("fatal").into())));
        scheduler.schedule_effect(logging(&log, "later"));

        assert!(scheduler.flush().is_err());
        assert!(log.borrow().is_empty());
        assert_eq!(scheduler.pending_effects(), 1);
        assert!(!scheduler.is_flush_scheduled());

        scheduler.flush().unwrap();
        assert_eq!(*log.borrow(), vec!["later"]);
    }

    #[test]
    fn pass_limit_reports_and_keeps_work() {
        let host = Rc::new(ManualHost::new());
        let config = SchedulerConfig {
            max_passes: Some(3),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::with_config(host.clone(), config);

        let slot: Rc<RefCell<Option<Task>>> = Rc::default();
        let looping = {
            let (scheduler, slot) = (scheduler.clone(), slot.clone());
            Task::new(move || {
                let next = slot.borrow().clone();
                if let Some(task) = next {
                    scheduler.schedule_effect(task);
                }
                Ok(())
            })
        };
        *slot.borrow_mut() = Some(looping.clone());
        scheduler.schedule_effect(looping);

        host.run().unwrap();
        let errors = host.take_errors();
        assert!(matches!(errors.as_slice(), [Error::FlushLimit { passes: 3 }]));
        assert_eq!(scheduler.pending_effects(), 1);

        // Break the cycle so the task and scheduler can be dropped.
        slot.borrow_mut().take();
    }

    #[test]
    fn batch_requests_a_single_flush() {
        let host = Rc::new(ManualHost::new());
        let scheduler = Scheduler::new(host.clone());
        let log = Log::default();

        let value = scheduler.batch(|| {
            scheduler.schedule_compute(logging(&log, "one"));
            scheduler.schedule_effect(logging(&log, "two"));
            assert_eq!(host.pending_flushes(), 0);
            7
        });
        assert_eq!(value, 7);
        assert_eq!(host.pending_flushes(), 1);

        host.run().unwrap();
        assert_eq!(*log.borrow(), vec!["one", "two"]);
    }

    #[test]
    fn immediate_host_flushes_inline() {
        let scheduler = Scheduler::new(ImmediateHost);
        let log = Log::default();
        scheduler.schedule_effect(logging(&log, "now"));
        assert_eq!(*log.borrow(), vec!["now"]);
        assert!(!scheduler.is_flush_scheduled());
    }

    #[test]
    fn batch_effects_wraps_each_effect_pass() {
        let batches = Rc::new(Cell::new(0));
        let host = {
            let batches = batches.clone();
            HookHost::new(
                |flush| {
                    let _ = flush();
                },
                move |run| {
                    batches.set(batches.get() + 1);
                    run();
                },
                |_| Ok(()),
            )
        };
        let scheduler = Scheduler::new(host);
        let log = Log::default();

        scheduler.batch(|| {
            scheduler.schedule_effect(logging(&log, "a"));
            scheduler.schedule_effect(logging(&log, "b"));
            scheduler.schedule_compute(logging(&log, "c"));
        });
        assert_eq!(*log.borrow(), vec!["c", "a", "b"]);
        assert_eq!(batches.get(), 1);
    }
}
