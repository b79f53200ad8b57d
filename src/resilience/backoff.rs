//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the delay that jitter may add or remove.
pub const JITTER_RATIO: f64 = 0.25;

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Backoff {
    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = calculate_backoff(attempt, self.initial_delay_ms, self.max_delay_ms, self.multiplier);
        if self.jitter {
            apply_jitter(base, self.max_delay_ms, &mut rand::thread_rng())
        } else {
            base
        }
    }
}

/// Calculate the capped exponential delay, without jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, multiplier: f64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = base_ms as f64 * multiplier.powi(exponent);
    let capped = if delay_ms.is_finite() {
        delay_ms.min(max_ms as f64)
    } else {
        max_ms as f64
    };

    Duration::from_millis(capped.max(0.0) as u64)
}

/// Perturb `delay` uniformly by up to ±25%, clamped to `[0, max_ms]`.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, max_ms: u64, rng: &mut R) -> Duration {
    let delay_ms = delay.as_millis() as f64;
    let spread = delay_ms * JITTER_RATIO;
    if spread <= 0.0 {
        return delay;
    }

    let jittered = delay_ms + rng.gen_range(-spread..=spread);
    Duration::from_millis(jittered.clamp(0.0, max_ms as f64) as u64)
}
