//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects.
//! These primitives form the foundation of Lattice's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only once somebody reads it. Memos are
//! useful for expensive computations that should not be repeated unnecessarily.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems,
//! such as updating the DOM or logging. Re-runs are queued and happen when the
//! scheduler flushes.
//!
//! ## Batches
//!
//! [`batch`] groups writes so that every affected effect runs once, after the
//! last write.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.
//!
//! Producers hold their subscribers weakly and tasks hold their dependencies
//! strongly, so dropping the last handle to an effect frees it and everything
//! only it was keeping alive.

mod batch;
mod context;
mod effect;
mod memo;
mod runtime;
mod scheduler;
mod signal;
mod subscriber;
mod task;

pub use batch::{batch, batch_depth, is_batching, try_batch};
pub use context::untrack;
pub use effect::Effect;
pub use memo::{Memo, MemoState};
pub use runtime::{MaybeReactive, ProducerId, Reactive, Runtime, RuntimeStats};
pub use scheduler::{flush_loop, flush_sync, is_flush_scheduled, pending_count};
pub use signal::Signal;
pub use subscriber::{SubscriberId, SubscriberTier, SMALL_SET_CAPACITY};
pub use task::{Cleanup, TaskState};
