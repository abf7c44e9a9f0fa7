//! Exponential backoff schedule with bounded jitter.
//!
//! Delay for failed attempt n is `base * 2^(n-1)`, capped at the
//! maximum, then jittered by a symmetric factor so synchronized
//! failures fan out instead of hammering a recovering endpoint in
//! lockstep.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters for the retry pipeline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget per event, including the first attempt.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the nominal delay before jitter.
    pub max_delay: Duration,
    /// Symmetric jitter as a fraction of the nominal delay (0.2 means
    /// the final delay lands in [0.8x, 1.2x]).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Nominal delay after `failed_attempts` failures, before jitter.
    pub fn nominal_delay(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let unclamped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        unclamped.min(self.max_delay)
    }

    /// Jittered delay before the next attempt, after `failed_attempts`
    /// failures. `retry_after` overrides the computed schedule when the
    /// endpoint named its own wait.
    pub fn next_delay(&self, failed_attempts: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(requested) = retry_after {
            return requested.min(self.max_delay);
        }

        let nominal = self.nominal_delay(failed_attempts);
        if nominal.is_zero() || self.jitter_factor <= 0.0 {
            return nominal;
        }

        let spread = nominal.as_secs_f64() * self.jitter_factor;
        let jitter = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((nominal.as_secs_f64() + jitter).max(0.0))
    }

    /// Whether an event with `failed_attempts` failures has exhausted
    /// its budget and must be dead-lettered instead of retried.
    pub fn should_dead_letter(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_delays_double_then_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(4));
        assert_eq!(policy.nominal_delay(4), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(5), Duration::from_secs(16));
        assert_eq!(policy.nominal_delay(6), Duration::from_secs(16));
        assert_eq!(policy.nominal_delay(60), Duration::from_secs(16));
    }

    #[test]
    fn zero_failures_means_no_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::ZERO);
        assert_eq!(policy.next_delay(0, None), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for failed in 1..=6 {
            let nominal = policy.nominal_delay(failed).as_secs_f64();
            for _ in 0..100 {
                let delay = policy.next_delay(failed, None).as_secs_f64();
                assert!(delay >= nominal * 0.8 - 1e-9, "delay {delay} below band for {failed}");
                assert!(delay <= nominal * 1.2 + 1e-9, "delay {delay} above band for {failed}");
            }
        }
    }

    #[test]
    fn retry_after_overrides_schedule_but_respects_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(120))),
            Duration::from_secs(16)
        );
    }

    #[test]
    fn budget_exhaustion_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_dead_letter(4));
        assert!(policy.should_dead_letter(5));
        assert!(policy.should_dead_letter(6));
    }

    #[test]
    fn zero_jitter_policy_is_deterministic() {
        let policy = RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() };
        assert_eq!(policy.next_delay(3, None), Duration::from_secs(4));
    }
}
