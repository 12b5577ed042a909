use std::time::Duration;

use crate::gateway::constants::BACKOFF_MAX_EXPONENT;

/// Exponential reconnect delay: `base * 2^min(attempt - 1, 3)`.
pub(crate) struct Backoff {
    attempt: u32,
    base_ms: u64,
    max_attempts: u32,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            base_ms,
            max_attempts,
        }
    }

    pub(crate) fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.base_ms * 2u64.pow((self.attempt - 1).min(BACKOFF_MAX_EXPONENT));
        Duration::from_millis(delay)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
