//! Retry policy for lease renewals: fixed backoff, bounded attempts.

use std::time::Duration;

use serde::Deserialize;

/// Retry policy for transient lease-renewal failures.
///
/// `max_attempts` counts every call, the first one included.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Wait between two attempts, in milliseconds.
    pub wait_ms: u64,

    /// Total number of attempts before giving up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(wait: Duration, max_attempts: u32) -> Self {
        Self {
            wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            max_attempts,
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    /// Whether another attempt is allowed after `attempts` calls failed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// 1 second between attempts, 5 attempts.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_waits_one_second_five_times() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait(), Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
