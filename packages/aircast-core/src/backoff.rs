//! Deterministic exponential backoff for child restarts.

use std::time::Duration;

use crate::constants::{BACKOFF_INITIAL, BACKOFF_MAX};

/// Exponential backoff with a cap and explicit reset.
///
/// `next()` yields `min(initial·2ⁿ, max)` for n = 0, 1, 2, …
/// No jitter; restart schedules must be predictable for operators reading
/// the logs.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
        }
    }

    /// Returns the current delay and doubles it for the next call,
    /// saturating at the maximum.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Restores the schedule to the given initial delay.
    pub fn reset(&mut self, initial: Duration) {
        self.current = initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_INITIAL, BACKOFF_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24, 48, 60, 60]);
    }

    #[test]
    fn reset_restores_initial() {
        let mut backoff = Backoff::default();
        backoff.next();
        backoff.next();
        backoff.reset(BACKOFF_INITIAL);
        assert_eq!(backoff.next(), Duration::from_secs(3));
    }

    #[test]
    fn custom_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(backoff.next(), Duration::from_secs(1));
        assert_eq!(backoff.next(), Duration::from_secs(2));
        assert_eq!(backoff.next(), Duration::from_secs(4));
        assert_eq!(backoff.next(), Duration::from_secs(4));
    }
}
