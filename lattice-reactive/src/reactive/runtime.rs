//! Reactive Runtime
//!
//! The runtime is the glue that connects signals, memos and effects. It owns
//! no graph of its own: edges live on the nodes (producers keep subscriber
//! sets, tasks keep dependency lists) and the runtime walks them when a value
//! changes.
//!
//! # How It Works
//!
//! 1. When a signal or memo is read inside a running task, [`track`] records
//!    an edge between the two.
//!
//! 2. When a signal's value changes (or a memo is invalidated), [`propagate`]
//!    visits the producer's subscribers:
//!    a. Memo tasks run on the spot. That marks their memo dirty and, if it
//!       was clean, propagates from the memo in turn. Memos never recompute
//!       here; they are lazy and recompute on next access.
//!    b. Effects are handed to the scheduler, or, inside a batch, remembered
//!       and scheduled when the batch ends.
//!
//! Because invalidation is synchronous, reading a memo right after a write
//! always sees the new inputs, even before any effect has flushed.
//!
//! # Thread Model
//!
//! Every piece of runtime state is thread-local and reactive values are
//! `!Send`. Each thread is an independent reactive world.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::trace;

use super::batch;
use super::context::ReactiveContext;
use super::memo::Memo;
use super::scheduler;
use super::signal::Signal;
use super::subscriber::{SubscriberId, TieredSet};
use super::task::TaskNode;
use crate::config::{self, RuntimeConfig};
use crate::error::ReactiveError;

/// Subscriber set stored on every producer.
pub(crate) type Subscribers = TieredSet<Weak<TaskNode>>;

/// Unique identifier for a producer (a signal or a memo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProducerId(u64);

impl ProducerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer#{}", self.0)
    }
}

/// Anything tasks can depend on.
pub(crate) trait Producer {
    fn producer_id(&self) -> ProducerId;

    fn subscribers(&self) -> &RefCell<Subscribers>;
}

/// The structural contract shared by every reactive source.
///
/// Binding layers use this (or [`MaybeReactive`]) to tell reactive sources
/// apart from plain values. The version is a change tag: it increases on every
/// effective write to a signal and every recomputation of a memo.
pub trait Reactive {
    /// Identity of the underlying producer. Clones share it.
    fn producer_id(&self) -> ProducerId;

    /// Current change tag.
    fn version(&self) -> u64;

    /// Number of tasks currently subscribed.
    fn subscriber_count(&self) -> usize;
}

/// Either a plain value or a reactive source of one.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::reactive::{MaybeReactive, Signal};
///
/// let label: MaybeReactive<&str> = MaybeReactive::Static("fixed");
/// let title: MaybeReactive<&str> = Signal::new("live").into();
///
/// assert!(!label.is_reactive());
/// assert!(title.is_reactive());
/// assert_eq!(title.get(), "live");
/// ```
pub enum MaybeReactive<T: 'static> {
    /// A value that never changes.
    Static(T),
    /// A signal.
    Signal(Signal<T>),
    /// A memo.
    Memo(Memo<T>),
}

impl<T: Clone + 'static> MaybeReactive<T> {
    /// Read the value, tracking it when it is reactive.
    pub fn get(&self) -> T {
        match self {
            MaybeReactive::Static(value) => value.clone(),
            MaybeReactive::Signal(signal) => signal.get(),
            MaybeReactive::Memo(memo) => memo.get(),
        }
    }

    /// Read the value without tracking.
    pub fn get_untracked(&self) -> T {
        match self {
            MaybeReactive::Static(value) => value.clone(),
            MaybeReactive::Signal(signal) => signal.get_untracked(),
            MaybeReactive::Memo(memo) => memo.get_untracked(),
        }
    }
}

impl<T: 'static> MaybeReactive<T> {
    /// Whether the value can change.
    pub fn is_reactive(&self) -> bool {
        !matches!(self, MaybeReactive::Static(_))
    }

    /// The change tag of the reactive source, or `None` for a static value.
    pub fn version(&self) -> Option<u64> {
        match self {
            MaybeReactive::Static(_) => None,
            MaybeReactive::Signal(signal) => Some(signal.version()),
            MaybeReactive::Memo(memo) => Some(memo.version()),
        }
    }
}

impl<T: Clone + 'static> Clone for MaybeReactive<T> {
    fn clone(&self) -> Self {
        match self {
            MaybeReactive::Static(value) => MaybeReactive::Static(value.clone()),
            MaybeReactive::Signal(signal) => MaybeReactive::Signal(signal.clone()),
            MaybeReactive::Memo(memo) => MaybeReactive::Memo(memo.clone()),
        }
    }
}

impl<T: 'static> From<Signal<T>> for MaybeReactive<T> {
    fn from(signal: Signal<T>) -> Self {
        MaybeReactive::Signal(signal)
    }
}

impl<T: 'static> From<Memo<T>> for MaybeReactive<T> {
    fn from(memo: Memo<T>) -> Self {
        MaybeReactive::Memo(memo)
    }
}

/// Record a read of `producer` by the current task, if there is one.
pub(crate) fn track<P: Producer + 'static>(producer: &Rc<P>) {
    if let Some(task) = ReactiveContext::current() {
        task.track(Rc::clone(producer) as Rc<dyn Producer>);
    }
}

/// Notify the subscribers of a producer whose value changed.
pub(crate) fn propagate(producer: Rc<dyn Producer>) {
    let subscribers = live_subscribers(producer.as_ref());
    if subscribers.is_empty() {
        return;
    }
    trace!(
        producer = %producer.producer_id(),
        subscribers = subscribers.len(),
        "propagating change"
    );

    let batching = batch::is_batching();
    let mut held = Vec::new();
    for task in subscribers {
        if !task.is_effect() {
            task.run();
        } else if batching {
            held.push(task);
        } else {
            scheduler::schedule(&task);
        }
    }

    if !held.is_empty() {
        batch::defer(producer.producer_id(), held);
    }
}

fn live_subscribers(producer: &dyn Producer) -> Vec<Rc<TaskNode>> {
    let subscribers = producer.subscribers().borrow();
    if subscribers.is_empty() {
        return Vec::new();
    }
    subscribers
        .iter()
        .filter_map(|(_, task)| task.upgrade())
        .collect()
}

/// A point-in-time view of this thread's runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Effects waiting for the next flush.
    pub pending: usize,
    /// Whether an asynchronous flush has been requested.
    pub flush_scheduled: bool,
    /// Current batch nesting depth.
    pub batch_depth: usize,
    /// Producers whose notification is deferred to the end of the batch.
    pub deferred: usize,
    /// Completed flushes that ran at least one pass.
    pub flushes: u64,
    /// Effect runs performed by flushes.
    pub tasks_run: u64,
}

/// Entry point for runtime-wide settings and introspection.
///
/// All state is per thread; these functions act on the calling thread.
pub struct Runtime;

impl Runtime {
    /// Validate and install a configuration for this thread.
    pub fn configure(config: RuntimeConfig) -> Result<(), ReactiveError> {
        config.validate()?;
        config::install(config);
        Ok(())
    }

    /// The configuration in effect on this thread.
    pub fn config() -> RuntimeConfig {
        config::current()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Get the task reads are currently attributed to, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current().map(|task| task.id())
    }

    /// Snapshot scheduler and batch state.
    pub fn stats() -> RuntimeStats {
        let scheduler = scheduler::stats();
        RuntimeStats {
            pending: scheduler.pending,
            flush_scheduled: scheduler.flush_scheduled,
            batch_depth: batch::batch_depth(),
            deferred: batch::deferred_count(),
            flushes: scheduler.flushes,
            tasks_run: scheduler.tasks_run,
        }
    }
}
