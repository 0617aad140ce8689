//! Task Records
//!
//! A task is anything that reads producers and must hear about their changes.
//! There are two kinds:
//!
//! - **Effect tasks** own a user body. Running one re-executes the body inside
//!   a fresh tracking context, which rebuilds its dependency set.
//!
//! - **Memo tasks** belong to a memo. The memo enters the task as the current
//!   context while it recomputes, so the reads of its compute function are
//!   recorded against it. Running a memo task never recomputes: it drops the
//!   task's edges and marks the memo dirty.
//!
//! # Lifecycle
//!
//! ```text
//!   idle --run--> running --body returns / panics--> idle
//!    |               |
//!    +---dispose-----+------------------------------> disposed (terminal)
//! ```
//!
//! A run on a running or disposed task is a no-op.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::Producer;
use super::subscriber::SubscriberId;

/// A procedure returned by an effect body, invoked before the next run and on
/// disposal.
pub type Cleanup = Box<dyn FnOnce()>;

pub(crate) type EffectBody = Box<dyn FnMut() -> Option<Cleanup>>;

/// Implemented by the owner of a memo task.
pub(crate) trait Invalidate {
    /// Mark the owner dirty and notify its own subscribers.
    fn invalidate(self: Rc<Self>);
}

pub(crate) enum TaskKind {
    /// The body is taken out of the cell for the duration of a run.
    Effect(RefCell<Option<EffectBody>>),
    Memo(Weak<dyn Invalidate>),
}

/// Observable lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a dependency to change.
    Idle,
    /// Executing its body (or, for a memo, its compute function).
    Running,
    /// Permanently inert.
    Disposed,
}

pub(crate) struct TaskNode {
    id: SubscriberId,
    kind: TaskKind,
    running: Cell<bool>,
    disposed: Cell<bool>,
    dependencies: RefCell<SmallVec<[Rc<dyn Producer>; 4]>>,
    cleanup: RefCell<Option<Cleanup>>,
    run_count: Cell<usize>,
}

impl TaskNode {
    fn with_kind(kind: TaskKind) -> Rc<Self> {
        Rc::new(Self {
            id: SubscriberId::new(),
            kind,
            running: Cell::new(false),
            disposed: Cell::new(false),
            dependencies: RefCell::new(SmallVec::new()),
            cleanup: RefCell::new(None),
            run_count: Cell::new(0),
        })
    }

    /// Create an effect task. It does not run until [`TaskNode::run`].
    pub(crate) fn effect(body: EffectBody) -> Rc<Self> {
        Self::with_kind(TaskKind::Effect(RefCell::new(Some(body))))
    }

    /// Create the tracking task of a memo.
    pub(crate) fn memo(owner: Weak<dyn Invalidate>) -> Rc<Self> {
        Self::with_kind(TaskKind::Memo(owner))
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_effect(&self) -> bool {
        matches!(self.kind, TaskKind::Effect(_))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn state(&self) -> TaskState {
        if self.disposed.get() {
            TaskState::Disposed
        } else if self.running.get() {
            TaskState::Running
        } else {
            TaskState::Idle
        }
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.get()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    /// Set the running flag until the guard drops.
    pub(crate) fn begin_run(&self) -> RunningGuard<'_> {
        self.running.set(true);
        RunningGuard(&self.running)
    }

    pub(crate) fn record_run(&self) {
        self.run_count.set(self.run_count.get() + 1);
    }

    /// Record a read of `producer` by this task.
    ///
    /// The producer's subscriber set and this task's dependency list always
    /// change together, so membership on one side means the edge exists on
    /// the other.
    pub(crate) fn track(self: &Rc<Self>, producer: Rc<dyn Producer>) {
        if self.disposed.get() {
            return;
        }
        {
            let mut subscribers = producer.subscribers().borrow_mut();
            if subscribers.contains(self.id) {
                return;
            }
            subscribers.insert(self.id, Rc::downgrade(self));
        }
        self.dependencies.borrow_mut().push(producer);
    }

    /// Drop every edge from this task to its producers.
    pub(crate) fn unsubscribe_all(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        for producer in &dependencies {
            producer.subscribers().borrow_mut().remove(self.id);
        }
    }

    /// Run the task once. See the module docs for what a run means per kind.
    pub(crate) fn run(self: &Rc<Self>) {
        if self.disposed.get() || self.running.get() {
            return;
        }
        match &self.kind {
            TaskKind::Effect(body) => self.run_effect(body),
            TaskKind::Memo(owner) => {
                self.unsubscribe_all();
                if let Some(owner) = owner.upgrade() {
                    owner.invalidate();
                }
            }
        }
    }

    fn run_effect(self: &Rc<Self>, slot: &RefCell<Option<EffectBody>>) {
        let previous_cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = previous_cleanup {
            cleanup();
        }
        self.unsubscribe_all();

        let Some(body) = slot.borrow_mut().take() else {
            return;
        };
        let mut body = RestoreBody {
            slot,
            body: Some(body),
            disposed: &self.disposed,
        };

        let cleanup = match body.body.as_mut() {
            Some(run) => {
                let _running = self.begin_run();
                let _context = ReactiveContext::enter(Rc::clone(self));
                run()
            }
            None => None,
        };
        drop(body);
        self.record_run();
        trace!(task = %self.id, runs = self.run_count.get(), "effect ran");

        // A body that disposed its own task already missed the dispose-time
        // cleanup, so its final cleanup runs now.
        if self.disposed.get() {
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        } else {
            *self.cleanup.borrow_mut() = cleanup;
        }
    }

    /// Make the task permanently inert. Safe to call repeatedly and mid-run.
    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        trace!(task = %self.id, "task disposed");

        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        self.unsubscribe_all();

        if let TaskKind::Effect(slot) = &self.kind {
            // Empty while the body is running; `RestoreBody` drops it instead.
            let body = slot.borrow_mut().take();
            drop(body);
        }
    }
}

impl Drop for TaskNode {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Clears a running flag when dropped, including during unwinding.
pub(crate) struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Puts an effect body back into its slot after a run, unless the task was
/// disposed meanwhile.
struct RestoreBody<'a> {
    slot: &'a RefCell<Option<EffectBody>>,
    body: Option<EffectBody>,
    disposed: &'a Cell<bool>,
}

impl Drop for RestoreBody<'_> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            *self.slot.borrow_mut() = self.body.take();
        }
    }
}
