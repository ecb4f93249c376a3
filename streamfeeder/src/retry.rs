//! Backoff for re-offering a message the sink did not take.

use std::time::Duration;

/// Exponential backoff with jitter, reset after every successful write.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; doubles per call up to `max`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let base = self.initial.saturating_mul(1_u32 << exponent).min(self.max);
        add_jitter(base).min(self.max)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Add random jitter to keep several feeders from retrying in lockstep
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let jitter_factor = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(100));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(8) && first <= Duration::from_millis(12));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(16) && second <= Duration::from_millis(24));

        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_millis(100));
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(1_000));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempts(), 5);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(12));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
    }
}
