//! Loop configuration.

use std::time::Duration;

/// Event name used by systems that do not name one.
pub const DEFAULT_EVENT: &str = "Default";

/// Loop configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// How long an identical system failure stays suppressed after it was
    /// reported.
    pub error_window: Duration,
    /// Event of systems that do not name one.
    pub default_event: String,
}

impl LoopConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_error_window(mut self, window: Duration) -> Self {
        self.error_window = window;
        self
    }

    #[must_use]
    pub fn with_default_event(mut self, event: impl Into<String>) -> Self {
        self.default_event = event.into();
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            error_window: Duration::from_secs(10),
            default_event: DEFAULT_EVENT.to_owned(),
        }
    }
}
