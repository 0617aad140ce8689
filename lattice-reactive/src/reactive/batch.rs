//! Batched Writes
//!
//! Inside [`batch`], writes still update values and invalidate memos
//! immediately, but effect notification is held back. Each written producer is
//! remembered once, together with the effects subscribed to it at the time of
//! the write. When the outermost batch exits those effects are scheduled and
//! flushed before `batch` returns. An effect that only subscribed after the
//! last write already saw the final value and is not run again.
//!
//! Nested batches only adjust the depth. If the batch function panics, the
//! held-back notifications are still handed to the scheduler while unwinding
//! so committed writes are not lost; they run at the next flush.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{error, trace};

use super::runtime::ProducerId;
use super::scheduler::{self, flush_sync};
use super::subscriber::SubscriberId;
use super::task::TaskNode;
use crate::error::ReactiveError;

#[derive(Default)]
struct BatchState {
    depth: usize,
    deferred: IndexMap<ProducerId, Held>,
}

type Held = IndexMap<SubscriberId, Weak<TaskNode>>;

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Check if a batch is active on this thread.
pub fn is_batching() -> bool {
    batch_depth() > 0
}

/// Current batch nesting depth.
pub fn batch_depth() -> usize {
    BATCH.with(|state| state.borrow().depth)
}

pub(crate) fn deferred_count() -> usize {
    BATCH.with(|state| state.borrow().deferred.len())
}

/// Hold back the notification of `effects` about a write to `producer`
/// until the batch exits.
pub(crate) fn defer(producer: ProducerId, effects: Vec<Rc<TaskNode>>) {
    BATCH.with(|state| {
        let mut state = state.borrow_mut();
        let held = state.deferred.entry(producer).or_insert_with(|| {
            trace!(producer = %producer, "notification deferred");
            Held::new()
        });
        for task in &effects {
            held.entry(task.id()).or_insert_with(|| Rc::downgrade(task));
        }
    });
}

struct BatchScope {
    outermost: bool,
}

impl BatchScope {
    fn enter() -> Self {
        let depth = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            state.depth += 1;
            state.depth
        });
        Self {
            outermost: depth == 1,
        }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let deferred = BATCH
            .try_with(|state| {
                let mut state = state.borrow_mut();
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    std::mem::take(&mut state.deferred)
                } else {
                    IndexMap::new()
                }
            })
            .unwrap_or_default();

        for task in deferred.into_values().flat_map(IndexMap::into_values) {
            if let Some(task) = task.upgrade() {
                scheduler::schedule(&task);
            }
        }
    }
}

fn run_batch<R>(f: impl FnOnce() -> R) -> (R, Result<(), ReactiveError>) {
    let scope = BatchScope::enter();
    let outermost = scope.outermost;
    let value = f();
    drop(scope);

    let flushed = if outermost { flush_sync() } else { Ok(()) };
    (value, flushed)
}

/// Run `f` with effect notifications coalesced.
///
/// Every effect affected by writes inside `f` runs at most once, after `f`
/// returns and before `batch` does. Flush failures are logged; use
/// [`try_batch`] to handle them.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use lattice_reactive::reactive::{batch, Effect, Signal};
///
/// let first = Signal::new("Ada");
/// let last = Signal::new("Lovelace");
/// let runs = Rc::new(Cell::new(0));
///
/// let _effect = {
///     let (first, last, runs) = (first.clone(), last.clone(), runs.clone());
///     Effect::new(move || {
///         let _ = (first.get(), last.get());
///         runs.set(runs.get() + 1);
///     })
/// };
///
/// batch(|| {
///     first.set("Grace");
///     last.set("Hopper");
/// });
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let (value, flushed) = run_batch(f);
    if let Err(err) = flushed {
        error!(error = %err, "flush at batch exit failed");
    }
    value
}

/// Like [`batch`], but returns flush failures instead of logging them.
///
/// The value of `f` is discarded when the flush fails; the writes it made
/// are kept.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
    let (value, flushed) = run_batch(f);
    flushed.map(|()| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{pending_count, Effect, Memo, Signal};
    use std::cell::Cell;

    fn sum_effect(a: &Signal<i32>, b: &Signal<i32>, runs: &Rc<Cell<usize>>) -> Effect {
        let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
        Effect::new(move || {
            let _ = a.get() + b.get();
            runs.set(runs.get() + 1);
        })
    }

    #[test]
    fn batch_coalesces_notifications() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _effect = sum_effect(&a, &b, &runs);

        batch(|| {
            a.set(1);
            b.set(2);
            a.set(3);
            assert_eq!(runs.get(), 1);
            assert_eq!(deferred_count(), 2);
        });

        assert_eq!(runs.get(), 2);
        assert_eq!(pending_count(), 0);
    }

    #[test]
    fn nested_batches_flush_at_outermost_exit() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _effect = sum_effect(&a, &b, &runs);

        batch(|| {
            a.set(1);
            batch(|| {
                b.set(1);
                assert_eq!(batch_depth(), 2);
            });
            assert_eq!(runs.get(), 1);
            assert!(is_batching());
        });

        assert_eq!(runs.get(), 2);
        assert!(!is_batching());
    }

    #[test]
    fn effect_created_after_last_write_runs_once() {
        let a = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let effect = batch(|| {
            a.set(1);
            let (a, runs) = (a.clone(), runs.clone());
            Effect::new(move || {
                assert_eq!(a.get(), 1);
                runs.set(runs.get() + 1);
            })
        });

        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(pending_count(), 0);
    }

    #[test]
    fn memos_are_fresh_inside_a_batch() {
        let a = Signal::new(1);
        let doubled = {
            let a = a.clone();
            Memo::new(move || a.get() * 2)
        };
        assert_eq!(doubled.get(), 2);

        batch(|| {
            a.set(5);
            assert_eq!(doubled.get(), 10);
        });
    }

    #[test]
    fn batch_returns_value() {
        let a = Signal::new(1);
        let value = batch(|| {
            a.set(2);
            a.get() * 10
        });
        assert_eq!(value, 20);
    }

    #[test]
    fn try_batch_surfaces_flush_failures() {
        let a = Signal::new(0);
        let _effect = {
            let a = a.clone();
            Effect::new(move || {
                if a.get() > 0 {
                    panic!("rejected");
                }
            })
        };

        let result = try_batch(|| a.set(1));
        let err = result.unwrap_err();
        assert_eq!(err.failures().len(), 1);
    }

    #[test]
    fn panicking_batch_still_hands_off_writes() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let _effect = sum_effect(&a, &b, &runs);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| {
                a.set(1);
                panic!("batch failed");
            })
        }));

        assert!(result.is_err());
        assert_eq!(batch_depth(), 0);
        assert_eq!(runs.get(), 1);
        assert_eq!(pending_count(), 1);

        flush_sync().unwrap();
        assert_eq!(runs.get(), 2);
    }
}
