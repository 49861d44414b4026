//! Exponential backoff between reconnect attempts
//!
//! `delay(k) = min(base * 2^k, max_delay)` where `k` is the number of
//! retries already scheduled since the last successful connection. With
//! jitter enabled a random 0-25% is added on top, still capped at
//! `max_delay`.
//!
//! ```rust
//! use tether_client::BackoffSchedule;
//! use std::time::Duration;
//!
//! let schedule = BackoffSchedule::new(Duration::from_millis(100), Duration::from_secs(1));
//! assert_eq!(schedule.delay(0), Duration::from_millis(100));
//! assert_eq!(schedule.delay(3), Duration::from_millis(800));
//! assert_eq!(schedule.delay(4), Duration::from_secs(1));
//! ```

use crate::config::ConnectConfig;
use std::time::Duration;

/// Backoff schedule for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    base: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffSchedule {
    /// Create a schedule without jitter
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            jitter: false,
        }
    }

    /// Schedule described by a connection config
    pub fn from_config(config: &ConnectConfig) -> Self {
        Self {
            base: config.retry_delay,
            max_delay: config.max_retry_delay,
            jitter: config.jitter,
        }
    }

    /// Enable jitter
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Deterministic delay before retry `k`
    pub fn base_delay(&self, k: u32) -> Duration {
        let factor = 1u32.checked_shl(k).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry `k`, jitter applied
    pub fn delay(&self, k: u32) -> Duration {
        let delay = self.base_delay(k);
        if !self.jitter {
            return delay;
        }

        use rand::Rng;
        let spread = delay.as_millis() as u64 / 4;
        let jitter_ms = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}
