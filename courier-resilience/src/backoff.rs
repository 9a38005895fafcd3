//! Backoff delay calculation for retry policies

use rand::Rng;
use std::time::Duration;

use crate::executor::RetryPolicy;

/// Computes the delay to wait before a given retry attempt.
///
/// The base delay grows exponentially with the attempt number and is capped
/// at the policy's `max_delay`. A uniform random jitter in `[0, base)` is
/// added on top so that concurrent callers retrying after the same failure
/// do not wake up in lockstep.
pub struct BackoffCalculator {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl BackoffCalculator {
    /// Create a calculator from a retry policy
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
            multiplier: policy.backoff_multiplier,
        }
    }

    /// Delay before retry attempt `attempt` (0-indexed)
    ///
    /// Attempt 0 yields `initial_delay` plus jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Delay computation with a caller-supplied RNG
    ///
    /// Deterministic given a seeded RNG; the only entry point tests need.
    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let jitter_ns = rng.gen_range(0..base.as_nanos().max(1)) as u64;
        base + Duration::from_nanos(jitter_ns)
    }

    /// The deterministic portion of the delay, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_exponential_growth() {
        let calc = BackoffCalculator::from_policy(&policy(100, 60_000, 2.0));

        assert_eq!(calc.base_delay(0), Duration::from_millis(100));
        assert_eq!(calc.base_delay(1), Duration::from_millis(200));
        assert_eq!(calc.base_delay(2), Duration::from_millis(400));
        assert_eq!(calc.base_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_max_delay_cap() {
        let calc = BackoffCalculator::from_policy(&policy(100, 500, 2.0));

        assert_eq!(calc.base_delay(2), Duration::from_millis(400));
        assert_eq!(calc.base_delay(3), Duration::from_millis(500)); // Capped
        assert_eq!(calc.base_delay(10), Duration::from_millis(500)); // Still capped
    }

    #[test]
    fn test_base_delay_monotonic() {
        let calc = BackoffCalculator::from_policy(&policy(50, 10_000, 1.5));

        for attempt in 0..20 {
            assert!(calc.base_delay(attempt + 1) >= calc.base_delay(attempt));
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let calc = BackoffCalculator::from_policy(&policy(100, 30_000, 2.0));
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..10 {
            let base = calc.base_delay(attempt);
            let delay = calc.delay_with_rng(attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay < base * 2);
            // Jittered delay never exceeds twice the configured ceiling
            assert!(delay < calc.max_delay * 2);
        }
    }

    #[test]
    fn test_attempt_zero_yields_initial_plus_jitter() {
        let calc = BackoffCalculator::from_policy(&policy(250, 30_000, 2.0));
        let mut rng = StdRng::seed_from_u64(42);

        let delay = calc.delay_with_rng(0, &mut rng);
        assert!(delay >= Duration::from_millis(250));
        assert!(delay < Duration::from_millis(500));
    }

    #[test]
    fn test_multiplier_one_is_fixed() {
        let calc = BackoffCalculator::from_policy(&policy(100, 1_000, 1.0));

        assert_eq!(calc.base_delay(0), Duration::from_millis(100));
        assert_eq!(calc.base_delay(5), Duration::from_millis(100));
        assert_eq!(calc.base_delay(50), Duration::from_millis(100));
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let calc = BackoffCalculator::from_policy(&policy(100, 30_000, 2.0));

        let a = calc.delay_with_rng(3, &mut StdRng::seed_from_u64(11));
        let b = calc.delay_with_rng(3, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
