//! Error types for the reactive runtime.
//!
//! Reading a signal or memo never fails on its own. Errors come from user code
//! (effect bodies and memo computations panicking), from a flush that does not
//! settle, or from an invalid configuration.

use thiserror::Error;

use crate::reactive::{ProducerId, SubscriberId};

/// Errors reported by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// One or more effects panicked while a flush was running them.
    ///
    /// Under the default [`FailurePolicy::Isolate`](crate::FailurePolicy)
    /// every other pending effect still ran.
    #[error("{} task(s) panicked during flush", .failures.len())]
    TaskFailures {
        /// One entry per panicking task, in the order they ran.
        failures: Vec<TaskFailure>,
    },

    /// The flush kept scheduling new work after `max_flush_cycles` passes.
    ///
    /// This almost always means two effects write to each other's inputs.
    #[error("flush did not settle after {cycles} cycles; dropped {dropped} pending task(s)")]
    CycleLimit {
        /// Number of passes that ran.
        cycles: usize,
        /// Tasks that were still pending and have been discarded.
        dropped: usize,
        /// Panics collected before the limit was hit.
        failures: Vec<TaskFailure>,
    },

    /// A memo was read while it was computing its own value.
    #[error("memo {memo} was read while computing its own value")]
    CircularRead {
        /// The memo that was re-entered.
        memo: ProducerId,
    },

    /// The configuration document could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid runtime configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },
}

impl ReactiveError {
    /// Task panics carried by this error, if any.
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            ReactiveError::TaskFailures { failures } => failures,
            ReactiveError::CycleLimit { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// A single effect that panicked during a flush.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task} panicked: {message}")]
pub struct TaskFailure {
    /// The effect that panicked.
    pub task: SubscriberId,
    /// The panic payload rendered as text.
    pub message: String,
}
