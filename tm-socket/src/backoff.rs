//! Reconnection backoff policy.
//!
//! `delay(n) = min(initial * decay^(n-1), max) + uniform(0, jitter)` for the
//! 1-based attempt `n`. The cap bounds the exponential term only, so a
//! jittered delay may exceed `max` by up to `jitter`.

use std::time::Duration;

use tm_core::config::ReconnectSettings;
use tm_core::constants;

/// Exponential backoff with a cap and additive jitter. Holds no counter of
/// its own; callers pass the attempt number.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Cap on the exponential term.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub decay: f64,
    /// Upper bound of the uniform jitter.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(constants::reconnect::INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(constants::reconnect::MAX_DELAY_MS),
            decay: constants::reconnect::DECAY,
            jitter: Duration::from_millis(constants::reconnect::JITTER_MS),
        }
    }
}

impl From<&ReconnectSettings> for BackoffPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            decay: settings.decay,
            jitter: Duration::from_millis(settings.jitter_ms),
        }
    }
}

impl BackoffPolicy {
    /// The capped exponential term for a 1-based attempt, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        let exponential = initial * self.decay.powi(exponent);
        // NaN and infinity both collapse onto the cap
        let capped = if exponential.is_finite() { exponential.min(max) } else { max };

        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Full delay for a 1-based attempt: capped term plus uniform jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = self.jitter.mul_f64(rand::random::<f64>());
        self.base_delay(attempt) + jitter
    }
}
