//! Rate-limited reporting of system failures.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::error;

use crate::error::SystemFailure;
use crate::system::SystemId;

/// Logs each distinct (system, message) failure at most once per window.
#[derive(Debug)]
pub struct ErrorReporter {
    window: Duration,
    reported: FxHashMap<(SystemId, String), Instant>,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            reported: FxHashMap::default(),
        }
    }

    /// Report a failure now. Returns `true` if it was logged.
    pub fn report(&mut self, system: SystemId, name: &str, failure: &SystemFailure) -> bool {
        self.report_at(system, name, failure, Instant::now())
    }

    /// Report a failure observed at `now`.
    pub fn report_at(
        &mut self,
        system: SystemId,
        name: &str,
        failure: &SystemFailure,
        now: Instant,
    ) -> bool {
        let key = (system, failure.message().to_owned());
        let recent = self
            .reported
            .get(&key)
            .is_some_and(|&last| now.saturating_duration_since(last) < self.window);
        if recent {
            return false;
        }

        self.reported.retain(|_, last| now.saturating_duration_since(*last) < self.window);
        self.reported.insert(key, now);

        error!(
            system = name,
            panicked = failure.panicked(),
            "system failed: {}",
            failure.message()
        );
        true
    }

    /// Forget everything reported for `system`.
    pub fn forget(&mut self, system: SystemId) {
        self.reported.retain(|(id, _), _| *id != system);
    }
}
