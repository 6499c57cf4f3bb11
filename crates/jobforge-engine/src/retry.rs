//! Retry backoff policy.
//!
//! Transient failures are re-queued with an exponential delay: the k-th
//! retry waits `base * 2^(k-1)` (2 s, 4 s, 8 s, ... with the default base),
//! capped so a long-suffering job does not back off past an hour. The delay
//! is applied as a not-before timestamp on the scheduler entry, so the
//! observed wait is at least the computed backoff.

use std::time::Duration;

/// Exponential backoff configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound on any single delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given base and the default cap.
    #[must_use]
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Delay before the retry following failure number `attempts`.
    ///
    /// `attempts` counts executions so far, so it is at least 1 when a
    /// retry is being scheduled.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(20);
        let delay = self.base.saturating_mul(1 << exp);
        delay.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(30), Duration::from_secs(3600));
    }

    #[test]
    fn test_custom_base() {
        let policy = RetryPolicy::new(Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(4), Duration::from_millis(80));
    }
}
