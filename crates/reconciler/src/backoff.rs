//! Exponential backoff computation.
//!
//! Requeue delays after failures are deterministic so they stay
//! monotonic across consecutive failures; only in-pass fetch retries
//! add jitter to avoid herding against a recovering artifact server.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for the given attempt, capped at `max`.
/// Attempt 0 yields `base`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(max)
}

/// `calculate_backoff` with up to 25% added jitter.
pub fn jittered_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = calculate_backoff(attempt, base, max);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    delay.mul_f64(1.0 + jitter).min(max)
}

/// Rate limiter mapping a failure counter to the next requeue delay.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    base: Duration,
    max: Duration,
}

impl RateLimiter {
    /// Create a rate limiter with the given bounds.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt, given consecutive failures so
    /// far. One failure yields the base delay.
    pub fn delay_for(&self, failures: u32) -> Duration {
        calculate_backoff(failures.saturating_sub(1), self.base, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(750);
    const MAX: Duration = Duration::from_secs(900);

    #[test]
    fn doubles_until_capped() {
        assert_eq!(calculate_backoff(0, BASE, MAX), BASE);
        assert_eq!(calculate_backoff(1, BASE, MAX), BASE * 2);
        assert_eq!(calculate_backoff(2, BASE, MAX), BASE * 4);
        assert_eq!(calculate_backoff(30, BASE, MAX), MAX);
    }

    #[test]
    fn survives_overflowing_attempts() {
        assert_eq!(calculate_backoff(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn rate_limiter_is_monotonic() {
        let limiter = RateLimiter::new(BASE, MAX);
        let mut previous = Duration::ZERO;
        for failures in 1..40 {
            let delay = limiter.delay_for(failures);
            assert!(delay >= previous, "delay decreased at failure {failures}");
            assert!(delay <= MAX);
            previous = delay;
        }
        assert_eq!(limiter.delay_for(1), BASE);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for attempt in 0..8 {
            let plain = calculate_backoff(attempt, BASE, MAX);
            let jittered = jittered_backoff(attempt, BASE, MAX);
            assert!(jittered >= plain);
            assert!(jittered <= MAX.max(plain.mul_f64(1.25)));
        }
    }
}
