use std::time::Duration;

use crate::config::EngineConfig;
use crate::constants::defaults;

/// Per-item retry policy with linear backoff: retry `n` waits `n` base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per item, first attempt included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the attempt after `attempt` (1-based), or `None` when exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(
            defaults::MAX_ATTEMPTS,
            Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
        )
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::linear(config.max_attempts, config.retry_base_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::linear(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(1), None);
    }
}
