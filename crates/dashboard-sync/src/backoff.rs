//! Reconnect delays for the push channel.

use std::time::Duration;

use rand::Rng;

use crate::config::ConnectionConfig;

/// Jitter strategy to apply to reconnect delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Always the capped exponential delay.
    #[default]
    None,
    /// A random delay in `[0, capped_delay]`.
    Full,
}

/// Capped exponential backoff with a bounded number of retries.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    jitter: Jitter,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            jitter: Jitter::None,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.reconnect_base_delay(),
            config.reconnect_max_delay(),
            config.max_reconnect_attempts,
        )
        .with_jitter(if config.reconnect_jitter {
            Jitter::Full
        } else {
            Jitter::None
        })
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(base * 2^attempt, cap)`, before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis();
        let cap_ms = self.cap.as_millis();
        let multiplier = 1u128.checked_shl(attempt.min(63)).unwrap_or(u128::MAX);
        let capped = base_ms.saturating_mul(multiplier).min(cap_ms);
        Duration::from_millis(capped.min(u64::MAX as u128) as u64)
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let capped = self.delay_for_attempt(self.attempt);
        let delay = match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                let max_ms = capped.as_millis().min(u64::MAX as u128) as u64;
                Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            }
        };
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
