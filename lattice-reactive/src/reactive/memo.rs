//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the cached
//!    value.
//!
//! 3. When a dependency changes, the memo is marked dirty and its own
//!    subscribers are notified. Nothing is recomputed yet.
//!
//! 4. On next access, the memo recomputes and becomes clean again.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay dirty (no wasted work)
//!
//! Each memo owns an internal tracking task. While the memo computes, that
//! task is the current context, so the computation's reads become the memo's
//! dependencies. When any of them changes, the task marks the memo dirty.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::{self, Producer, ProducerId, Reactive, Subscribers};
use super::task::{Invalidate, TaskNode};
use crate::error::ReactiveError;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// The memo must recompute before its next read returns.
    Dirty,
}

struct MemoNode<T> {
    id: ProducerId,
    task: Rc<TaskNode>,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    /// Subscribers have heard about the current dirty state. Cleared whenever
    /// a recompute starts, so the next invalidation is always propagated,
    /// even after a failed computation.
    notified: Cell<bool>,
    version: Cell<u64>,
    subscribers: RefCell<Subscribers>,
}

impl<T> Producer for MemoNode<T> {
    fn producer_id(&self) -> ProducerId {
        self.id
    }

    fn subscribers(&self) -> &RefCell<Subscribers> {
        &self.subscribers
    }
}

impl<T: 'static> Invalidate for MemoNode<T> {
    fn invalidate(self: Rc<Self>) {
        self.dirty.set(true);
        if self.notified.replace(true) {
            return;
        }
        trace!(memo = %self.id, "memo invalidated");
        runtime::propagate(self);
    }
}

impl<T: Clone + 'static> MemoNode<T> {
    fn read(&self) -> Result<T, ReactiveError> {
        if self.task.is_running() {
            return Err(ReactiveError::CircularRead { memo: self.id });
        }
        if !self.dirty.get() {
            if let Some(value) = self.value.borrow().as_ref() {
                return Ok(value.clone());
            }
        }
        Ok(self.recompute())
    }

    /// Run the computation with the memo's task as the current context.
    ///
    /// A panicking computation leaves the memo dirty with its previous value.
    fn recompute(&self) -> T {
        self.notified.set(false);
        self.task.unsubscribe_all();
        let value = {
            let _running = self.task.begin_run();
            let _context = ReactiveContext::enter(Rc::clone(&self.task));
            (self.compute)()
        };

        let previous = self.value.replace(Some(value.clone()));
        self.dirty.set(false);
        self.version.set(self.version.get() + 1);
        self.task.record_run();
        trace!(
            memo = %self.id,
            version = self.version.get(),
            dependencies = self.task.dependency_count(),
            "memo recomputed"
        );
        drop(previous);
        value
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::reactive::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let squared = {
///     let count = count.clone();
///     Memo::new(move || count.get() * count.get())
/// };
///
/// assert_eq!(squared.get(), 4);
/// count.set(3);
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Memo<T: 'static> {
    node: Rc<MemoNode<T>>,
}

impl<T: 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let node = Rc::new_cyclic(|node: &Weak<MemoNode<T>>| {
            let owner: Weak<dyn Invalidate> = node.clone();
            MemoNode {
                id: ProducerId::next(),
                task: TaskNode::memo(owner),
                compute: Box::new(compute),
                value: RefCell::new(None),
                dirty: Cell::new(true),
                notified: Cell::new(false),
                version: Cell::new(0),
                subscribers: RefCell::new(Subscribers::new()),
            }
        });
        Self { node }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> ProducerId {
        self.node.id
    }

    /// Number of recomputations since creation.
    pub fn version(&self) -> u64 {
        self.node.version.get()
    }

    /// Mark the memo dirty and notify its subscribers.
    pub fn mark_dirty(&self) {
        Rc::clone(&self.node).invalidate();
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        if self.node.dirty.get() {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.node.value.borrow().is_some()
    }

    /// Get the number of tasks subscribed to this memo.
    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.borrow().len()
    }

    /// Number of producers the last computation read.
    pub fn dependency_count(&self) -> usize {
        self.node.task.dependency_count()
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the memo is read while computing itself. Use
    /// [`Memo::try_get`] to handle that case.
    pub fn get(&self) -> T {
        self.try_get().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Returns [`ReactiveError::CircularRead`] when the memo's computation
    /// reads the memo itself, directly or through other memos.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        if self.node.task.is_running() {
            return Err(ReactiveError::CircularRead { memo: self.node.id });
        }
        runtime::track(&self.node);
        self.node.read()
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Still recomputes if the memo is dirty.
    ///
    /// # Panics
    ///
    /// Panics if the memo is read while computing itself. Use
    /// [`Memo::try_get`] to handle that case.
    pub fn get_untracked(&self) -> T {
        self.node.read().unwrap_or_else(|err| panic!("{err}"))
    }
}

impl<T: 'static> Reactive for Memo<T> {
    fn producer_id(&self) -> ProducerId {
        self.node.id
    }

    fn version(&self) -> u64 {
        Memo::version(self)
    }

    fn subscriber_count(&self) -> usize {
        Memo::subscriber_count(self)
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.node.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
