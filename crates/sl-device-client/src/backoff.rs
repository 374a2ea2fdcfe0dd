//! Exponential backoff with jitter for reconnect attempts.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max) * (1 ± jitter)
//! ```
//!
//! The first delay is exactly `initial`; jitter spreads the later ones so a
//! fleet that lost the broker at the same moment does not come back in lockstep.
//! There is no attempt limit: a device keeps trying until it is released.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    /// Fraction of the delay to randomize, in `[0, 1]`.
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Out-of-range values are clamped; a non-finite multiplier or jitter
    /// falls back to the default.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let defaults = ReconnectConfig::default();
        let multiplier = if multiplier.is_finite() { multiplier } else { defaults.multiplier };
        let jitter = if jitter.is_finite() { jitter } else { defaults.jitter };
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
            config.jitter,
        )
    }

    /// Call when a connection succeeds, so the next failure starts over.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the next sleep duration and advances the schedule.
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.current_delay;

        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()));

        if self.attempt == 1 || self.jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor).min(self.max_delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
