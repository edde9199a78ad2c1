//! Backoff policy for chunk retries

use std::time::Duration;

/// Bounds for retrying a chunk
///
/// Transport failures are retried up to `max_attempts` calls in total.
/// Rate-limit responses are retried until `rate_limit_ceiling` of wall time
/// has been spent on the same chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(32),
            rate_limit_ceiling: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Exponential delay before retry number `attempt` (0-based), with jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        delay + jitter(delay)
    }

    /// Delay to honour after a rate-limit response
    ///
    /// A provider-supplied `Retry-After` wins over the computed backoff.
    pub fn rate_limit_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) => delay.min(self.rate_limit_ceiling),
            None => self.backoff(attempt),
        }
    }
}

/// Random jitter in `[0, delay / 2]`
fn jitter(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(random_u64() % (half + 1))
}

/// Cheap non-cryptographic randomness from the std hasher seed
pub(crate) fn random_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default(),
    );
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            ..RetryPolicy::default()
        };

        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));

        let third = policy.backoff(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));

        let capped = policy.backoff(30);
        assert!(capped >= Duration::from_millis(1000) && capped <= Duration::from_millis(1500));
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate();
        for attempt in 0..5 {
            assert_eq!(policy.backoff(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::immediate();
        assert_eq!(
            policy.rate_limit_delay(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(policy.rate_limit_delay(0, None), Duration::ZERO);
    }
}
