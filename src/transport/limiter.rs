//! Token-bucket admission control for outbound business traffic.
//!
//! Tokens refill lazily from elapsed monotonic time, capped at the
//! burst capacity. Acquisition never blocks and is never retried here;
//! a failed acquisition is surfaced to the caller as a typed,
//! recoverable outcome.

use std::time::Instant;

/// A token bucket with lazy refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Burst capacity.
    capacity: f64,
    /// Tokens currently available.
    tokens: f64,
    /// Sustained refill rate, tokens per second.
    rate: f64,
    /// When tokens were last refilled.
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(burst: u32, rate_per_sec: u32) -> Self {
        Self {
            capacity: burst as f64,
            tokens: burst as f64,
            rate: rate_per_sec as f64,
            last_refill: Instant::now(),
        }
    }

    /// Consume one token if available. Never blocks.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Consume one token, refilling from elapsed time up to `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        self.tokens as u32
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
    }
}
