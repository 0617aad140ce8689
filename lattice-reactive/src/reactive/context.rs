//! Reactive Context
//!
//! The reactive context tracks which task is currently running. This enables
//! automatic dependency tracking: when a signal or memo is read, it registers
//! the current task as a subscriber.
//!
//! # Implementation
//!
//! We use a single thread-local slot holding the current task. Entering a
//! context swaps the new task into the slot and keeps the previous occupant in
//! the returned guard. Dropping the guard puts the previous task back.
//!
//! This design supports nested reactive contexts (an effect created inside
//! another effect, a memo read from inside an effect) and keeps the slot
//! consistent when a body panics, because the guard is dropped during
//! unwinding.

use std::cell::RefCell;
use std::rc::Rc;

use super::task::TaskNode;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Rc<TaskNode>>> = const { RefCell::new(None) };
}

/// Guard that restores the previous context when dropped.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub(crate) struct ReactiveContext {
    previous: Option<Rc<TaskNode>>,
}

impl ReactiveContext {
    /// Make `task` the current task until the guard is dropped.
    pub(crate) fn enter(task: Rc<TaskNode>) -> Self {
        Self::swap(Some(task))
    }

    /// Clear the current task until the guard is dropped.
    pub(crate) fn suspend() -> Self {
        Self::swap(None)
    }

    fn swap(task: Option<Rc<TaskNode>>) -> Self {
        let previous = CURRENT_TASK.with(|slot| slot.replace(task));
        Self { previous }
    }

    /// The task reads are currently attributed to, if any.
    pub(crate) fn current() -> Option<Rc<TaskNode>> {
        CURRENT_TASK.with(|slot| slot.borrow().clone())
    }

    /// Check if there is an active reactive context.
    pub(crate) fn is_active() -> bool {
        CURRENT_TASK.with(|slot| slot.borrow().is_some())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // The replaced task is dropped outside the slot borrow.
        let _replaced = CURRENT_TASK.try_with(|slot| slot.replace(previous));
    }
}

/// Run `f` without attributing its reads to the current task.
///
/// Signals and memos read inside `f` do not become dependencies of the
/// surrounding effect or memo.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _context = ReactiveContext::suspend();
    f()
}
