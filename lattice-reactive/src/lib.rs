//! Lattice Reactive
//!
//! This crate provides the fine-grained reactive runtime behind the Lattice UI
//! framework. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Automatic dependency tracking
//! - A coalescing effect scheduler with batching
//! - Tokio integration for flushing on the next executor tick
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, dependency tracking and scheduling
//! - `config`: Per-thread runtime configuration
//! - `error`: Errors reported by flushes, memo reads and configuration
//!
//! The runtime is single-threaded. Every thread has its own current task,
//! pending queue, batch state and configuration, and reactive values are not
//! `Send`.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use lattice_reactive::reactive::{flush_sync, Effect, Memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Memo::new(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = {
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     Effect::new(move || {
//!         log.borrow_mut().push(format!("Count: {}, Doubled: {}", count.get(), doubled.get()));
//!     })
//! };
//!
//! // Update the signal; the memo is fresh right away, the effect runs on flush
//! count.set(5);
//! assert_eq!(doubled.get(), 10);
//! flush_sync().unwrap();
//!
//! assert_eq!(log.borrow().last().unwrap(), "Count: 5, Doubled: 10");
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::{FailurePolicy, RuntimeConfig, DEFAULT_MAX_FLUSH_CYCLES};
pub use error::{ReactiveError, TaskFailure};
pub use reactive::{
    batch, flush_sync, try_batch, untrack, Effect, MaybeReactive, Memo, Reactive, Runtime,
    Signal,
};
