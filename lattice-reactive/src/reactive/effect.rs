//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued on the scheduler and
//!    re-runs at the next flush.
//!
//! 3. Before re-running, the effect drops its old dependencies and tracks new
//!    ones during execution, so branches not taken stop triggering it.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Effects can optionally return a cleanup function. This function is called
//! before the effect re-runs and when the effect is disposed. This is useful
//! for cleaning up resources like event listeners or timers.
//!
//! # Lifetime
//!
//! The [`Effect`] handle owns the effect. It stays live while any clone of
//! the handle exists and is disposed when the last one is dropped, or earlier
//! through [`Effect::dispose`]. [`Effect::detach`] keeps it alive for the rest
//! of the thread.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::subscriber::SubscriberId;
use super::task::{Cleanup, TaskNode, TaskState};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use lattice_reactive::reactive::{flush_sync, Effect, Signal};
///
/// let count = Signal::new(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let effect = {
///     let count = count.clone();
///     let log = log.clone();
///     Effect::new(move || log.borrow_mut().push(count.get()))
/// };
///
/// count.set(5);
/// flush_sync().unwrap();
/// assert_eq!(*log.borrow(), vec![0, 5]);
///
/// effect.dispose();
/// count.set(6);
/// flush_sync().unwrap();
/// assert_eq!(*log.borrow(), vec![0, 5]);
/// ```
#[derive(Clone)]
#[must_use = "an effect is disposed when its last handle is dropped"]
pub struct Effect {
    node: Rc<TaskNode>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies. A
    /// panic in that first run propagates to the caller and the effect is
    /// disposed.
    pub fn new<F>(mut run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self::with_cleanup(move || -> Option<Cleanup> {
            run();
            None
        })
    }

    /// Create an effect whose function may return a cleanup.
    ///
    /// The cleanup runs before the next execution and on disposal.
    pub fn with_cleanup<F>(run: F) -> Self
    where
        F: FnMut() -> Option<Cleanup> + 'static,
    {
        let node = TaskNode::effect(Box::new(run));
        trace!(task = %node.id(), "effect created");
        node.run();
        Self { node }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.node.id()
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanup and detaches from every dependency. After
    /// disposal, the effect will not run again. Calling this more than once,
    /// or from inside the effect's own function, is allowed.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    /// Keep the effect running for the lifetime of the thread without holding
    /// a handle.
    pub fn detach(self) {
        std::mem::forget(self.node);
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.node.is_disposed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.node.state()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.node.run_count()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.node.dependency_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{flush_sync, Signal};
    use std::cell::{Cell, RefCell};

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.set(run_count_clone.get() + 1);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.get(), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.state(), TaskState::Idle);
    }

    #[test]
    fn effect_reruns_on_flush_not_on_write() {
        let signal = Signal::new(0);
        let signal_clone = signal.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
        });

        signal.set(1);
        assert_eq!(effect.run_count(), 1);

        flush_sync().unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let signal_clone = signal.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
        });

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(effect.dependency_count(), 0);

        signal.set(1);
        flush_sync().unwrap();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn dependencies_are_retracked_each_run() {
        let use_a = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);

        let effect = {
            let (use_a, a, b) = (use_a.clone(), a.clone(), b.clone());
            Effect::new(move || {
                if use_a.get() {
                    a.get();
                } else {
                    b.get();
                }
            })
        };
        assert_eq!((a.subscriber_count(), b.subscriber_count()), (1, 0));

        use_a.set(false);
        flush_sync().unwrap();
        assert_eq!((a.subscriber_count(), b.subscriber_count()), (0, 1));

        a.set(10);
        flush_sync().unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let effect = {
            let signal = signal.clone();
            let log = log.clone();
            Effect::with_cleanup(move || {
                let value = signal.get();
                log.borrow_mut().push(format!("run {value}"));
                let log = log.clone();
                Some(Box::new(move || log.borrow_mut().push(format!("cleanup {value}"))) as Cleanup)
            })
        };

        signal.set(1);
        flush_sync().unwrap();
        effect.dispose();

        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn dropping_last_handle_disposes() {
        let signal = Signal::new(0);
        let signal_clone = signal.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
        });
        let clone = effect.clone();

        drop(effect);
        assert_eq!(signal.subscriber_count(), 1);
        assert!(!clone.is_disposed());

        drop(clone);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn detached_effect_keeps_running() {
        let signal = Signal::new(0);
        let seen = Rc::new(Cell::new(0));

        {
            let signal = signal.clone();
            let seen = seen.clone();
            Effect::new(move || seen.set(signal.get())).detach();
        }

        signal.set(3);
        flush_sync().unwrap();
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn dispose_from_inside_the_body() {
        let signal = Signal::new(0);
        let holder: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let cleanups = Rc::new(Cell::new(0));

        let effect = {
            let signal = signal.clone();
            let holder = holder.clone();
            let cleanups = cleanups.clone();
            Effect::with_cleanup(move || {
                if signal.get() > 0 {
                    let this = holder.borrow().clone();
                    if let Some(this) = this {
                        this.dispose();
                    }
                }
                let cleanups = cleanups.clone();
                Some(Box::new(move || cleanups.set(cleanups.get() + 1)) as Cleanup)
            })
        };
        *holder.borrow_mut() = Some(effect.clone());

        signal.set(1);
        flush_sync().unwrap();

        assert!(effect.is_disposed());
        // One cleanup before the rerun, one for the cleanup the final run returned.
        assert_eq!(cleanups.get(), 2);
        assert_eq!(signal.subscriber_count(), 0);
        holder.borrow_mut().take();
    }

    #[test]
    fn panic_in_first_run_propagates() {
        let signal = Signal::new(0);
        let signal_clone = signal.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Effect::new(move || {
                signal_clone.get();
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.run_count(), 1);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
