//! Rate Limiter Module
//!
//! Converts an accumulated sample count into the delay needed to keep the
//! long-run average rate at or below a configured rate.

use std::time::Duration;

// == Rate Limiter ==
/// Average-rate throttle measured from the limiter's creation.
///
/// `samples` only ever grows. The delay is the time a perfectly throttled
/// producer would have needed for all samples so far, minus the time that has
/// actually elapsed.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate: f64,
    samples: f64,
    quantum: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `desired_rate` samples per `time_quantum`.
    ///
    /// `desired_rate` must be non-zero.
    pub fn new(desired_rate: usize, time_quantum: Duration) -> Self {
        debug_assert!(desired_rate > 0, "rate limiter needs a positive rate");
        Self {
            rate: desired_rate as f64,
            samples: 0.0,
            quantum: time_quantum,
        }
    }

    pub fn add_samples(&mut self, samples: f64) {
        self.samples += samples;
    }

    pub fn samples(&self) -> f64 {
        self.samples
    }

    /// Total time a rate-limited producer needs for the samples seen so far.
    pub fn compute_time_needed(&self) -> Duration {
        let secs = self.quantum.as_secs_f64() * self.samples / self.rate;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay still owed after `elapsed` time, zero if already within rate.
    pub fn compute_delay_needed(&self, elapsed: Duration) -> Duration {
        self.compute_time_needed().saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_new_limiter_needs_no_time() {
        let limiter = RateLimiter::new(60, HOUR);
        assert_eq!(limiter.compute_time_needed(), Duration::ZERO);
        assert_eq!(limiter.compute_delay_needed(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_time_needed_scales_with_samples() {
        let mut limiter = RateLimiter::new(60, HOUR);
        limiter.add_samples(1.0);
        assert_eq!(limiter.compute_time_needed(), Duration::from_secs(60));

        limiter.add_samples(2.0);
        assert_eq!(limiter.compute_time_needed(), Duration::from_secs(180));
    }

    #[test]
    fn test_delay_subtracts_elapsed() {
        let mut limiter = RateLimiter::new(10, Duration::from_secs(10));
        limiter.add_samples(5.0);

        assert_eq!(
            limiter.compute_delay_needed(Duration::from_secs(2)),
            Duration::from_secs(3)
        );
        // Never negative
        assert_eq!(
            limiter.compute_delay_needed(Duration::from_secs(20)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_samples_never_reset() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        for _ in 0..1000 {
            limiter.add_samples(1.0);
        }
        assert_eq!(limiter.samples(), 1000.0);
        // Long uptime pays the debt off, further samples start from the total
        assert_eq!(
            limiter.compute_delay_needed(Duration::from_secs(999)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_huge_sample_count_saturates() {
        let mut limiter = RateLimiter::new(1, HOUR);
        limiter.add_samples(f64::MAX);
        assert_eq!(limiter.compute_time_needed(), Duration::MAX);
    }
}
