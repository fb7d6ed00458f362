//! Reconnect Backoff
//!
//! Exponential backoff with symmetric jitter:
//!
//! ```text
//! delay(attempt) = min(max_delay, initial_delay * 2^attempt) * (1 ± jitter_factor)
//! ```
//!
//! [`Backoff`] never hands out a shorter delay than the previous one until it
//! is reset, so jitter cannot make consecutive waits shrink.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered delay
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1)`; 0.3 spreads delays over ±30%
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.3,
        }
    }
}

impl BackoffConfig {
    /// Un-jittered delay for attempt N (0-indexed)
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let exp = 2f64.powi(attempt.min(32) as i32);
        let capped = (initial_ms * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay for attempt N with jitter applied
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = self.jitter_factor.clamp(0.0, 0.99);
        if jitter == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::from_millis((base * factor) as u64)
    }
}

/// Stateful attempt counter for one connection
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last_delay: Duration,
}

impl Backoff {
    /// Create a fresh backoff at attempt 0
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Attempts handed out since the last reset
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt; advances the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .config
            .jittered_delay(self.attempt)
            .max(self.last_delay);
        self.attempt += 1;
        self.last_delay = delay;
        delay
    }

    /// Back to attempt 0 (call after every successful open)
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let config = no_jitter();

        assert_eq!(config.base_delay(0), Duration::from_millis(100));
        assert_eq!(config.base_delay(1), Duration::from_millis(200));
        assert_eq!(config.base_delay(2), Duration::from_millis(400));
        assert_eq!(config.base_delay(3), Duration::from_millis(800));
        assert_eq!(config.base_delay(4), Duration::from_millis(1000)); // Capped
        assert_eq!(config.base_delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = BackoffConfig {
            jitter_factor: 0.3,
            ..no_jitter()
        };

        for _ in 0..200 {
            let delay = config.jittered_delay(2).as_millis();
            assert!((280..=520).contains(&delay), "delay {delay} outside ±30% of 400");
        }
    }

    #[test]
    fn test_delays_never_shrink_until_reset() {
        let mut backoff = Backoff::new(BackoffConfig {
            jitter_factor: 0.9,
            ..no_jitter()
        });

        let mut previous = Duration::ZERO;
        for _ in 0..12 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(backoff.attempt(), 12);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(190));
    }
}
