//! Exponential-backoff retry policy for failed generation jobs.
//!
//! A job that fails (ComfyUI error, missing outputs, timeout, lost prompt)
//! is resubmitted after `base_delay * multiplier^retry_count`, clamped to
//! `max_delay`, until `max_retries` attempts have been spent.

use std::time::Duration;

/// Default number of automatic retries per job.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(30);

/// Default upper bound on any single retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);

/// Tunable parameters for the retry backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retry ceiling applied to newly created jobs.
    pub max_retries: i32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Factor by which the delay grows after each retry.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: 2.0,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based: the first retry
    /// uses attempt 0 and waits `base_delay`).
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let mut delay = self.base_delay.min(self.max_delay);
        for _ in 0..attempt.max(0) {
            delay = next_delay(delay, self);
            if delay >= self.max_delay {
                break;
            }
        }
        delay
    }
}

/// Calculate the next backoff delay from the current delay.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Whether a job that has already been retried `retry_count` times may be
/// retried again under a ceiling of `max_retries`.
pub fn should_retry(retry_count: i32, max_retries: i32) -> bool {
    retry_count < max_retries
}
