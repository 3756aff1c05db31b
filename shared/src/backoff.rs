//! Reconnect backoff policy
//!
//! Delay for retry `n` is `min(base * 2^n, cap)` plus a uniform jitter in
//! `[0, jitter)`. Once `n` reaches `max_retries` no further delay is offered.

use crate::defaults;
use rand::Rng;
use std::time::Duration;

/// Exponential, capped, jittered backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt
    pub base_delay: Duration,
    /// Cap of the exponential part
    pub max_delay: Duration,
    /// Exclusive bound of the random jitter
    pub jitter: Duration,
    /// Number of consecutive attempts allowed
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(defaults::BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::CAP_DELAY_MS),
            jitter: Duration::from_millis(defaults::JITTER_MS),
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Exponential delay for the given retry count, without jitter
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full delay for the given retry count and jitter sample
    pub fn delay_for(&self, retry: u32, jitter: Duration) -> Duration {
        self.base_delay_for(retry) + jitter
    }

    /// Whether the retry budget is spent
    pub fn is_exhausted(&self, retry: u32) -> bool {
        retry >= self.max_retries
    }

    /// Draw a jitter sample uniformly from `[0, jitter)`
    pub fn sample_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..bound))
    }

    /// Delay before the next attempt, or `None` once retries are exhausted
    pub fn next_delay(&self, retry: u32) -> Option<Duration> {
        if self.is_exhausted(retry) {
            return None;
        }
        Some(self.delay_for(retry, self.sample_jitter()))
    }
}
