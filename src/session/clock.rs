//! Server clock-offset estimation.
//!
//! Time-sync envelopes carry the server's clock in milliseconds; the
//! session smooths `server - local` samples into an offset estimate so
//! callers can reason in server time without a second round trip.

/// Smoothing factor for offset samples (1/8, the smoothed-RTT convention).
const OFFSET_ALPHA: f64 = 0.125;

/// EWMA estimate of the server/local clock offset.
#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    offset_ms: f64,
    initialized: bool,
}

impl ClockSync {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample of server and local clocks, both in
    /// milliseconds.
    pub fn update(&mut self, server_millis: i64, local_millis: i64) {
        let sample = (server_millis - local_millis) as f64;
        if self.initialized {
            self.offset_ms = (1.0 - OFFSET_ALPHA) * self.offset_ms + OFFSET_ALPHA * sample;
        } else {
            self.offset_ms = sample;
            self.initialized = true;
        }
    }

    /// The current offset estimate in milliseconds (server − local).
    pub fn offset_millis(&self) -> i64 {
        self.offset_ms as i64
    }

    /// Estimated server clock for the given local clock.
    pub fn server_time_millis(&self, local_millis: i64) -> i64 {
        local_millis + self.offset_millis()
    }

    /// Whether at least one sample has been folded in.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
