//! Bounded retry with exponential backoff and jitter for transient device
//! I/O errors. Exhaustion fails only the affected session; fatal errors are
//! never retried.

use crate::{WipeError, WipeResult};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the first failure.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 - 1.0, randomness added to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient()
    }
}

impl RetryPolicy {
    /// Preset for transient device errors.
    pub fn transient() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.3,
        }
    }

    /// No retries; the first failure is final.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// delay = base * 2^attempt, capped, with +/- jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential_ms = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << attempt.min(20));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis()) as f64;

        let jitter_range = capped_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        Duration::from_millis((capped_ms + jitter).max(0.0) as u64)
    }
}

/// Runs `op`, retrying transient failures per the policy.
pub fn retry_io<T>(policy: &RetryPolicy, mut op: impl FnMut() -> WipeResult<T>) -> WipeResult<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    ?delay,
                    "transient device error, retrying: {e}"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
