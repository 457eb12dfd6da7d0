//! Exponential backoff with full jitter for event channel reconnects.
//!
//! `delay = random(0, min(cap, base * 2^attempt))`.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff calculator with full jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Base delay in milliseconds.
    base_ms: u64,
    /// Maximum delay cap in milliseconds.
    max_ms: u64,
    /// Current attempt number (0-indexed).
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff calculator.
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Backoff following a reconnect policy.
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_ms, config.max_ms)
    }

    /// Upper bound of the next delay, before jitter.
    pub fn ceiling(&self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Compute the next delay with full jitter and advance the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let capped = self.ceiling().as_millis() as u64;
        let jittered = if capped == 0 {
            0
        } else {
            fastrand::u64(0..=capped)
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset the attempt counter after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
