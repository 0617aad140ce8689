//! Runtime Configuration
//!
//! The reactive runtime is thread-local, and so is its configuration. A
//! thread starts with [`RuntimeConfig::default`]; call
//! [`Runtime::configure`](crate::reactive::Runtime::configure) to change it.
//!
//! Configurations can be loaded from JSON:
//!
//! ```rust
//! use lattice_reactive::{FailurePolicy, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_json(r#"{ "failure_policy": "halt" }"#).unwrap();
//! assert_eq!(config.failure_policy, FailurePolicy::Halt);
//! assert_eq!(config.max_flush_cycles, 100);
//! ```

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default upper bound on flush passes before the scheduler gives up.
pub const DEFAULT_MAX_FLUSH_CYCLES: usize = 100;

/// What a flush does when an effect panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the panic and keep running the remaining effects.
    #[default]
    Isolate,

    /// Stop at the first panic. Effects that had not run yet stay pending.
    Halt,
}

/// Tunables for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum number of passes a single flush may take to reach a fixed point.
    pub max_flush_cycles: usize,

    /// How panicking effects are handled during a flush.
    pub failure_policy: FailurePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_cycles: DEFAULT_MAX_FLUSH_CYCLES,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from JSON.
    ///
    /// Missing fields take their default value; unknown fields are rejected.
    pub fn from_json(input: &str) -> Result<Self, ReactiveError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.max_flush_cycles == 0 {
            return Err(ReactiveError::InvalidConfig {
                reason: "max_flush_cycles must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

thread_local! {
    static CONFIG: Cell<RuntimeConfig> = Cell::new(RuntimeConfig::default());
}

/// The configuration in effect on this thread.
pub(crate) fn current() -> RuntimeConfig {
    CONFIG.with(Cell::get)
}

/// Replace this thread's configuration. Callers validate first.
pub(crate) fn install(config: RuntimeConfig) {
    CONFIG.with(|slot| slot.set(config));
}
