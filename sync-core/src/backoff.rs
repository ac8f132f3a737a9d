//! Retry backoff policy.

use std::time::Duration;

/// Exponential backoff for failed retryable operations.
///
/// Formula: min(max_delay, base_delay * 2^retry_count) + random(0..=jitter)
///
/// `retry_count` is the count after the failure was recorded, so the first
/// retry waits `2 * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Upper bound of random jitter added on top (zero disables jitter).
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Create a policy without jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    /// Add random jitter to every delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt of an operation with `retry_count`
    /// failed attempts.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        // 2^16 is far past any sane cap; keeps the multiplication in range
        let factor = 2u32.saturating_pow(retry_count.min(16));
        let base = self.base_delay.saturating_mul(factor).min(self.max_delay);
        base + self.random_jitter()
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut bytes = [0u8; 8];
        match getrandom::getrandom(&mut bytes) {
            Ok(()) => Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1)),
            Err(_) => Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
