//! Reconnect attempt accounting.
//!
//! The policy is a fixed-interval retry with an attempt cap; there is
//! no exponential growth by default. The counter resets whenever a
//! connection is successfully established.

use std::time::Duration;

/// Decides whether another reconnect attempt may be made.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    /// Attempt cap; 0 means unlimited.
    max_attempts: u32,
    interval: Duration,
}

impl ReconnectPolicy {
    /// Create a policy with the given cap (0 = unlimited) and fixed
    /// backoff interval.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            interval,
        }
    }

    /// Account one more attempt.
    ///
    /// Returns the wait before that attempt, or `None` once the cap is
    /// exhausted.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.interval)
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection was established: start counting afresh.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_exhausts() {
        let mut policy = ReconnectPolicy::new(3, Duration::from_millis(50));
        assert!(policy.next_attempt().is_some());
        assert!(policy.next_attempt().is_some());
        assert!(policy.next_attempt().is_some());
        assert_eq!(policy.next_attempt(), None);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn test_zero_cap_is_unlimited() {
        let mut policy = ReconnectPolicy::new(0, Duration::from_millis(50));
        for _ in 0..1000 {
            assert_eq!(policy.next_attempt(), Some(Duration::from_millis(50)));
        }
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(1, Duration::ZERO);
        assert!(policy.next_attempt().is_some());
        assert_eq!(policy.next_attempt(), None);

        policy.reset();
        assert!(policy.next_attempt().is_some());
    }
}
