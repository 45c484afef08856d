//! Reconnect backoff
//!
//! Doubling delay capped at a maximum, with random jitter so a fleet of
//! clients does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

/// Exponent cap; beyond this attempts keep the maximum delay
const MAX_DOUBLINGS: u32 = 6;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    jitter_ms: u64,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration, jitter_ms: u64) -> Self {
        Self {
            initial,
            max,
            jitter_ms,
            attempts: 0,
        }
    }

    /// Next delay: `initial * 2^attempts` capped at `max`, plus jitter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(self.attempts.min(MAX_DOUBLINGS)));
        self.attempts = self.attempts.saturating_add(1);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        base.min(self.max) + Duration::from_millis(jitter)
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_growth() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(60), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
    }

    #[test]
    fn test_capped_at_max() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(5), Duration::from_secs(60), 0);
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.next_delay();
        }
        assert_eq!(last, Duration::from_secs(60));
    }

    #[test]
    fn test_reset_restarts_growth() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(60), 0);
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..20 {
            let mut backoff =
                ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(60), 50);
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
