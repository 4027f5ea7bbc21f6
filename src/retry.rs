//! Retry policy for stage execution.

use std::time::Duration;

/// Backoff schedule for retrying a failed stage.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry with the given zero-based index.
    pub fn delay_for(&self, retry_index: usize) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry_index as u32)
    }
}
