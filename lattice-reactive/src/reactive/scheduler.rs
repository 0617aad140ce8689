//! Effect Scheduler
//!
//! Effects are not re-run the moment one of their dependencies changes.
//! Instead they are added to a pending set, and the whole set is drained by a
//! flush. Many writes in a row therefore cost one run per affected effect.
//!
//! # Algorithm
//!
//! 1. `schedule` inserts a task into the pending set (keyed by task ID, so
//!    scheduling twice is a no-op) and requests a flush if none is requested.
//! 2. A flush swaps the pending set out and runs every task in insertion
//!    order, skipping disposed tasks. A task that is already running (the
//!    flush was started from inside it) is set aside and put back once the
//!    flush ends, so it runs again after its current run.
//! 3. Tasks scheduled by those runs land in a fresh pending set; the flush
//!    repeats until the set stays empty. This includes a task that wrote to
//!    one of its own dependencies: it runs again in the next pass.
//!
//! A flush gives up after `RuntimeConfig::max_flush_cycles` passes, which
//! breaks effects that keep re-triggering each other.
//!
//! # Driving Flushes
//!
//! A flush request signals a thread-local [`Notify`]. Hosts running a tokio
//! `LocalSet` spawn [`flush_loop`] once and flushing then happens on the next
//! executor tick after a write. Hosts without an executor call [`flush_sync`]
//! themselves.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};

use super::batch;
use super::subscriber::SubscriberId;
use super::task::TaskNode;
use crate::config::{self, FailurePolicy};
use crate::error::{ReactiveError, TaskFailure};

type Pending = IndexMap<SubscriberId, Weak<TaskNode>>;

#[derive(Default)]
struct SchedulerState {
    pending: Pending,
    flush_scheduled: bool,
    flush_depth: usize,
    flushes: u64,
    tasks_run: u64,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
    static FLUSH_SIGNAL: Rc<Notify> = Rc::new(Notify::new());
}

/// Counters exposed through `Runtime::stats`.
pub(crate) struct SchedulerStats {
    pub(crate) pending: usize,
    pub(crate) flush_scheduled: bool,
    pub(crate) flushes: u64,
    pub(crate) tasks_run: u64,
}

pub(crate) fn stats() -> SchedulerStats {
    SCHEDULER.with(|state| {
        let state = state.borrow();
        SchedulerStats {
            pending: state.pending.len(),
            flush_scheduled: state.flush_scheduled,
            flushes: state.flushes,
            tasks_run: state.tasks_run,
        }
    })
}

/// Queue a task for the next flush.
pub(crate) fn schedule(task: &Rc<TaskNode>) {
    if task.is_disposed() {
        return;
    }

    // A batch flushes on exit and an active flush drains what it queues, so
    // neither needs an async flush.
    let batching = batch::is_batching();
    let request = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if state.pending.contains_key(&task.id()) {
            return false;
        }
        state.pending.insert(task.id(), Rc::downgrade(task));
        trace!(task = %task.id(), pending = state.pending.len(), "task scheduled");

        let request = !state.flush_scheduled && state.flush_depth == 0 && !batching;
        if request {
            state.flush_scheduled = true;
        }
        request
    });

    if request {
        request_flush();
    }
}

fn request_flush() {
    FLUSH_SIGNAL.with(|signal| signal.notify_one());
}

/// Whether an asynchronous flush has been requested and not yet run.
pub fn is_flush_scheduled() -> bool {
    SCHEDULER.with(|state| state.borrow().flush_scheduled)
}

/// Number of tasks waiting for the next flush.
pub fn pending_count() -> usize {
    SCHEDULER.with(|state| state.borrow().pending.len())
}

/// Tracks the flush depth and re-arms the async flush for leftovers.
struct FlushGuard;

impl FlushGuard {
    fn enter() -> Self {
        SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.flush_depth += 1;
            state.flush_scheduled = false;
        });
        FlushGuard
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let rearm = SCHEDULER
            .try_with(|state| {
                let mut state = state.borrow_mut();
                state.flush_depth = state.flush_depth.saturating_sub(1);
                let rearm = state.flush_depth == 0
                    && !state.pending.is_empty()
                    && !state.flush_scheduled;
                if rearm {
                    state.flush_scheduled = true;
                }
                rearm
            })
            .unwrap_or(false);
        if rearm {
            let _ = FLUSH_SIGNAL.try_with(|signal| signal.notify_one());
        }
    }
}

/// Run every pending effect, and everything those runs schedule, now.
///
/// Panics inside effects are caught. With the default
/// [`FailurePolicy::Isolate`] every other pending effect still runs and the
/// panics are returned together as [`ReactiveError::TaskFailures`]. With
/// [`FailurePolicy::Halt`] the flush stops at the first panic and the effects
/// that had not run yet stay pending.
///
/// Returns [`ReactiveError::CycleLimit`] when effects keep scheduling each
/// other past `max_flush_cycles` passes; the remaining work is dropped.
///
/// Calling this from inside an effect is allowed and drains whatever is
/// pending at that point.
pub fn flush_sync() -> Result<(), ReactiveError> {
    let config = config::current();
    let _guard = FlushGuard::enter();

    let mut failures = Vec::new();
    let mut cycles = 0;
    let mut ran = 0u64;
    let mut in_progress = Vec::new();

    loop {
        let queue = SCHEDULER.with(|state| std::mem::take(&mut state.borrow_mut().pending));
        if queue.is_empty() {
            break;
        }
        if cycles == config.max_flush_cycles {
            let dropped = queue.len();
            warn!(
                cycles,
                dropped,
                "flush did not settle; dropping pending effects"
            );
            record_flush(ran);
            return Err(ReactiveError::CycleLimit {
                cycles,
                dropped,
                failures,
            });
        }
        cycles += 1;

        let mut tasks = queue.into_values();
        while let Some(task) = tasks.next() {
            let Some(task) = task.upgrade() else {
                continue;
            };
            if task.is_disposed() {
                continue;
            }
            if task.is_running() {
                in_progress.push(task);
                continue;
            }

            ran += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                let failure = TaskFailure {
                    task: task.id(),
                    message: panic_message(payload.as_ref()),
                };
                error!(task = %failure.task, message = %failure.message, "effect panicked during flush");
                failures.push(failure);

                if config.failure_policy == FailurePolicy::Halt {
                    requeue(tasks);
                    restore(in_progress);
                    record_flush(ran);
                    return Err(ReactiveError::TaskFailures { failures });
                }
            }
        }
    }

    restore(in_progress);
    record_flush(ran);
    if cycles > 0 {
        debug!(cycles, tasks = ran, failures = failures.len(), "flush complete");
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ReactiveError::TaskFailures { failures })
    }
}

/// Put tasks a halted flush did not reach back in front of the queue.
fn requeue(rest: impl Iterator<Item = Weak<TaskNode>>) {
    SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        let mut pending: Pending = rest
            .filter_map(|task| {
                let id = task.upgrade()?.id();
                Some((id, task))
            })
            .collect();
        for (id, task) in state.pending.drain(..) {
            pending.entry(id).or_insert(task);
        }
        state.pending = pending;
    });
}

/// Queue tasks that were mid-run when a nested flush reached them.
fn restore(tasks: Vec<Rc<TaskNode>>) {
    for task in &tasks {
        schedule(task);
    }
}

fn record_flush(ran: u64) {
    SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if ran > 0 {
            state.flushes += 1;
        }
        state.tasks_run += ran;
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Flush pending effects whenever a flush is requested.
///
/// Spawn this once per thread on a tokio `LocalSet`:
///
/// ```rust,no_run
/// use lattice_reactive::reactive::flush_loop;
///
/// # async fn run() {
/// let local = tokio::task::LocalSet::new();
/// local.spawn_local(flush_loop());
/// # }
/// ```
///
/// The future never completes. Flush errors are logged.
pub async fn flush_loop() {
    let signal = FLUSH_SIGNAL.with(Rc::clone);
    loop {
        signal.notified().await;
        if let Err(err) = flush_sync() {
            error!(error = %err, "scheduled flush failed");
        }
    }
}
