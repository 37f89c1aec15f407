//! Loop error types.

use std::any::Any;

use thiserror::Error;

/// Scheduling error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// Some systems of an event can never have all their `after`
    /// dependencies run before them: a cycle, a dependency on a system of a
    /// higher priority, or one that belongs to another event or is not
    /// scheduled.
    #[error("unable to schedule systems for event `{event}`: {systems:?} wait on systems that never run first")]
    Unschedulable {
        event: String,
        /// Names of the systems left unplaced.
        systems: Vec<String>,
    },

    /// The system was never scheduled on this loop, or was evicted.
    #[error("system is not scheduled: {name}")]
    NotScheduled { name: String },

    /// A replacement that is already scheduled in its own right.
    #[error("system is already scheduled: {name}")]
    AlreadyScheduled { name: String },
}

/// Result type for loop operations.
pub type LoopResult<T> = Result<T, LoopError>;

/// Why a system run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SystemFailure {
    message: String,
    panicked: bool,
}

impl SystemFailure {
    /// A failure returned by the system.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panicked: false,
        }
    }

    /// A failure from a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "system panicked with a non-string payload".to_owned());

        Self {
            message,
            panicked: true,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `true` if the system panicked rather than returning an error.
    #[must_use]
    pub const fn panicked(&self) -> bool {
        self.panicked
    }
}
