use std::time::Duration;

use backoff::backoff::Backoff;

/// Bounded exponential backoff for the retry ticker.
///
/// Yields `min`, `2 * min`, `4 * min`, ... and then stays at `max`. It never
/// gives up, the ticker is stopped explicitly once a poll succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.min(max);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }
}

impl Backoff for RetryBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn doubles_until_capped() {
        let mut backoff = RetryBackoff::new(secs(60), secs(600));
        let delays: Vec<_> = (0..7).map(|_| backoff.next_backoff().unwrap()).collect();

        assert_eq!(
            delays,
            vec![secs(60), secs(120), secs(240), secs(480), secs(600), secs(600), secs(600)]
        );
    }

    #[test]
    fn reset_returns_to_min() {
        let mut backoff = RetryBackoff::new(secs(1), secs(10));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(secs(1)));
    }

    #[test]
    fn equal_bounds_are_constant() {
        let mut backoff = RetryBackoff::new(secs(5), secs(5));
        for _ in 0..3 {
            assert_eq!(backoff.next_backoff(), Some(secs(5)));
        }
    }

    #[test]
    fn never_overflows() {
        let mut backoff = RetryBackoff::new(Duration::MAX / 2, Duration::MAX);
        for _ in 0..4 {
            assert!(backoff.next_backoff().is_some());
        }
        assert_eq!(backoff.next_backoff(), Some(Duration::MAX));
    }
}
