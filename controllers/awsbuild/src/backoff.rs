//! Fibonacci backoff for reconciliation retries.
//!
//! Errors requeue with a progressively longer delay: 1m, 1m, 2m, 3m, 5m,
//! 8m, capped at 10m. Fibonacci grows slower than doubling, which suits
//! reconciliations that legitimately take a few passes to converge.

use std::time::Duration;

/// Stateful Fibonacci backoff, tracked per resource.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
}

impl FibonacciBackoff {
    /// Backoff starting at `min_minutes` and saturating at `max_minutes`.
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
        }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        result
    }

    /// Restarts the sequence after a successful reconciliation.
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_sequence_and_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                minutes(1),
                minutes(1),
                minutes(2),
                minutes(3),
                minutes(5),
                minutes(8),
                minutes(10),
                minutes(10),
            ]
        );
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), minutes(1));
        assert_eq!(backoff.next_delay(), minutes(1));
        assert_eq!(backoff.next_delay(), minutes(2));
    }
}
