//! Retry policy for the supervisory loop.
//!
//! Every recoverable fault (render, encoder, store) counts as one failed
//! attempt. After `max_consecutive_failures` in a row the channel gives up
//! and settles in `Error` until an operator starts it again.
//!
//! # Backoff
//!
//! - delay = base * multiplier^(failures - 1), capped at `max_delay`
//! - with the default multiplier of 1.0 the delay is fixed

use std::time::Duration;

use crate::config::AppConfig;

/// Default maximum consecutive failures.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Default delay between attempts (5 seconds).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default wait between polls of an empty queue (10 seconds).
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(10);

/// Default backoff cap (5 minutes).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: i32 = 10;

/// Retry configuration for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failures in a row before giving up.
    pub max_consecutive_failures: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth per additional consecutive failure.
    pub multiplier: f64,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Wait before re-reading an empty queue.
    pub idle_poll: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            base_delay: DEFAULT_RETRY_DELAY,
            multiplier: 1.0,
            max_delay: DEFAULT_MAX_DELAY,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }
}

impl RetryPolicy {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_retries,
            base_delay: config.retry_delay,
            idle_poll: config.idle_poll,
            ..Self::default()
        }
    }

    /// Exponential variant of this policy.
    pub fn with_multiplier(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    /// Delay before the attempt following the `failures`-th consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(MAX_EXPONENT as u32) as i32;
        let factor = if self.multiplier > 1.0 {
            self.multiplier.powi(exponent)
        } else {
            1.0
        };
        self.base_delay.mul_f64(factor).min(self.max_delay.max(self.base_delay))
    }

    fn limit(&self) -> u32 {
        self.max_consecutive_failures.max(1)
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Back off for `delay`, then try again.
    Retry { attempt: u32, delay: Duration },
    /// The threshold was reached.
    Exhausted { attempts: u32 },
}

/// Consecutive-failure bookkeeping for one session.
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    consecutive: u32,
    total: u64,
    last_error: Option<String>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and decide what happens next.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: impl Into<String>) -> FailureVerdict {
        self.consecutive = self.consecutive.saturating_add(1);
        self.total += 1;
        self.last_error = Some(error.into());

        if self.consecutive >= policy.limit() {
            FailureVerdict::Exhausted {
                attempts: self.consecutive,
            }
        } else {
            FailureVerdict::Retry {
                attempt: self.consecutive,
                delay: policy.delay_for(self.consecutive),
            }
        }
    }

    /// Record an error that does not count toward the threshold.
    pub fn note_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// A segment streamed cleanly; the streak starts over.
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Forget everything, including the last error.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: max,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_fixed_backoff_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default().with_multiplier(2.0, Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(100), Duration::from_secs(30));
    }

    #[test]
    fn test_exhausted_after_exactly_max_failures() {
        let policy = policy(3);
        let mut tracker = FailureTracker::new();

        assert!(matches!(
            tracker.record_failure(&policy, "a"),
            FailureVerdict::Retry { attempt: 1, .. }
        ));
        assert!(matches!(
            tracker.record_failure(&policy, "b"),
            FailureVerdict::Retry { attempt: 2, .. }
        ));
        assert_eq!(
            tracker.record_failure(&policy, "c"),
            FailureVerdict::Exhausted { attempts: 3 }
        );
        assert_eq!(tracker.last_error(), Some("c"));
        assert_eq!(tracker.total(), 3);
    }

    #[test]
    fn test_success_resets_streak() {
        let policy = policy(3);
        let mut tracker = FailureTracker::new();
        tracker.record_failure(&policy, "a");
        tracker.record_failure(&policy, "b");
        tracker.record_success();

        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(
            tracker.record_failure(&policy, "c"),
            FailureVerdict::Retry {
                attempt: 1,
                delay: DEFAULT_RETRY_DELAY
            }
        );
        assert_eq!(tracker.total(), 3);
    }

    #[test]
    fn test_zero_max_gives_up_on_first_failure() {
        let mut tracker = FailureTracker::new();
        assert_eq!(
            tracker.record_failure(&policy(0), "boom"),
            FailureVerdict::Exhausted { attempts: 1 }
        );
        tracker.reset();
        assert_eq!(tracker.consecutive(), 0);
        assert!(tracker.last_error().is_none());
    }
}
