//! Bounded retry delay schedules.
//!
//! The socket reconnection loop and each connection monitor hold their own
//! `Backoff` instance; their counters are never shared, so one concern's
//! failures cannot mask or reset the other's.

use std::time::Duration;

/// How the delay grows with each consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSchedule {
    /// Attempt `n` fires after `base * n`.
    Linear,
    /// Attempt `n` fires after `min(base * 2^(n-1), max_delay)`.
    Exponential { max_delay: Duration },
}

/// A bounded retry budget.
///
/// `next_delay` hands out at most `max_retries` delays; once exhausted it
/// returns `None` until `reset()` is called by the owning component after a
/// fresh successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_retries: u32,
    schedule: BackoffSchedule,
    retry_count: u32,
}

impl Backoff {
    pub fn linear(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
            schedule: BackoffSchedule::Linear,
            retry_count: 0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
            schedule: BackoffSchedule::Exponential { max_delay },
            retry_count: 0,
        }
    }

    /// Consumes one attempt and returns its delay, or `None` when the retry
    /// budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retry_count >= self.max_retries {
            return None;
        }
        self.retry_count += 1;
        let n = self.retry_count;
        let delay = match self.schedule {
            BackoffSchedule::Linear => self.base_delay.saturating_mul(n),
            BackoffSchedule::Exponential { max_delay } => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(n - 1))
                .min(max_delay),
        };
        Some(delay)
    }

    /// The attempt number of the most recently issued delay (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}
