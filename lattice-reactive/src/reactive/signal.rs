//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which tasks depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that task as a subscriber.
//!
//! 2. When a signal's value changes, every subscriber is notified. Writes
//!    that leave the value equal (per the signal's equality rule) notify no
//!    one.
//!
//! 3. Memos downstream are marked dirty on the spot; effects are queued on
//!    the scheduler and re-run at the next flush.
//!
//! # Memory Layout
//!
//! Each signal handle is a single `Rc` to a shared node holding:
//! - A unique ID (8 bytes)
//! - The value
//! - A version counter
//! - A tiered subscriber set (inline while there are zero or one subscribers)

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use super::runtime::{self, Producer, ProducerId, Reactive, Subscribers};
use super::subscriber::SubscriberTier;

struct SignalNode<T> {
    id: ProducerId,
    value: RefCell<T>,
    version: Cell<u64>,
    equals: fn(&T, &T) -> bool,
    subscribers: RefCell<Subscribers>,
}

impl<T> Producer for SignalNode<T> {
    fn producer_id(&self) -> ProducerId {
        self.id
    }

    fn subscribers(&self) -> &RefCell<Subscribers> {
        &self.subscribers
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use lattice_reactive::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T: 'static> {
    node: Rc<SignalNode<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, <T as PartialEq>::eq)
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with a custom equality rule.
    ///
    /// A write is ignored when `equals(current, new)` returns true. Pass
    /// `|_, _| false` to notify on every write.
    pub fn with_equality(value: T, equals: fn(&T, &T) -> bool) -> Self {
        Self {
            node: Rc::new(SignalNode {
                id: ProducerId::next(),
                value: RefCell::new(value),
                version: Cell::new(0),
                equals,
                subscribers: RefCell::new(Subscribers::new()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> ProducerId {
        self.node.id
    }

    /// Number of effective writes since creation.
    pub fn version(&self) -> u64 {
        self.node.version.get()
    }

    /// Set a new value and notify subscribers.
    pub fn set(&self, value: T) {
        let node = &self.node;
        let unchanged = {
            let current = node.value.borrow();
            (node.equals)(&*current, &value)
        };
        if unchanged {
            trace!(signal = %node.id, "write skipped, value unchanged");
            return;
        }

        let previous = node.value.replace(value);
        node.version.set(node.version.get() + 1);
        trace!(signal = %node.id, version = node.version.get(), "signal written");

        runtime::propagate(Rc::clone(node) as Rc<dyn Producer>);
        // The old value drops after subscribers have been notified.
        drop(previous);
    }

    /// Update the value using a function of the current one.
    ///
    /// `f` must not write to this same signal.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let current = self.node.value.borrow();
            f(&*current)
        };
        self.set(next);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.borrow().len()
    }

    /// Storage tier of the subscriber set.
    pub fn subscriber_tier(&self) -> SubscriberTier {
        self.node.subscribers.borrow().tier()
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called while an effect or memo is running, this also registers
    /// that task as a subscriber.
    pub fn get(&self) -> T {
        runtime::track(&self.node);
        self.node.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.node.value.borrow().clone()
    }
}

impl<T: 'static> Reactive for Signal<T> {
    fn producer_id(&self) -> ProducerId {
        self.node.id
    }

    fn version(&self) -> u64 {
        Signal::version(self)
    }

    fn subscriber_count(&self) -> usize {
        Signal::subscriber_count(self)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Signal");
        debug.field("id", &self.node.id);
        match self.node.value.try_borrow() {
            Ok(value) => debug.field("value", &*value),
            Err(_) => debug.field("value", &"<borrowed>"),
        };
        debug
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{flush_sync, Effect};

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_notifies_subscribers() {
        let signal = Signal::new(0);
        let call_count = Rc::new(Cell::new(0));

        let call_count_clone = call_count.clone();
        let signal_clone = signal.clone();
        let _effect = Effect::new(move || {
            signal_clone.get();
            call_count_clone.set(call_count_clone.get() + 1);
        });
        assert_eq!(call_count.get(), 1);

        signal.set(1);
        flush_sync().unwrap();
        assert_eq!(call_count.get(), 2);

        signal.set(2);
        flush_sync().unwrap();
        assert_eq!(call_count.get(), 3);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let signal = Signal::new(7);
        let call_count = Rc::new(Cell::new(0));

        let call_count_clone = call_count.clone();
        let signal_clone = signal.clone();
        let _effect = Effect::new(move || {
            signal_clone.get();
            call_count_clone.set(call_count_clone.get() + 1);
        });

        signal.set(7);
        flush_sync().unwrap();

        assert_eq!(call_count.get(), 1);
        assert_eq!(signal.version(), 0);
    }

    #[test]
    fn custom_equality_controls_notification() {
        let always = Signal::with_equality(1, |_, _| false);
        always.set(1);
        assert_eq!(always.version(), 1);

        let by_len = Signal::with_equality(String::from("abc"), |a, b| a.len() == b.len());
        by_len.set(String::from("xyz"));
        assert_eq!(by_len.version(), 0);
        assert_eq!(by_len.get(), "abc");
    }

    #[test]
    fn signal_unsubscribes_on_dispose() {
        let signal = Signal::new(0);
        let signal_clone = signal.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
        });
        assert_eq!(signal.subscriber_count(), 1);
        assert_eq!(signal.subscriber_tier(), SubscriberTier::Single);

        effect.dispose();
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(signal.subscriber_tier(), SubscriberTier::Empty);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn debug_output_includes_value() {
        let signal = Signal::new("hello");
        let rendered = format!("{signal:?}");
        assert!(rendered.contains("hello"));
        assert!(rendered.contains("subscriber_count"));
    }
}
