//! Session-wide counters.
//!
//! Counters are plain relaxed atomics: they are an observability
//! surface, not a synchronization mechanism. The request-timeout and
//! route-lock counts in particular are what make the lifecycle
//! properties of the engine externally verifiable.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Monotonic counters maintained by a session.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Envelopes handed to a channel.
    pub sent: AtomicU64,
    /// Envelopes decoded off the wire.
    pub received: AtomicU64,
    /// Sends rejected synchronously by the channel.
    pub send_failures: AtomicU64,
    /// Requests rejected by the token bucket.
    pub rate_limited: AtomicU64,
    /// Correlated requests that timed out.
    pub requests_timed_out: AtomicU64,
    /// Correlated requests completed by a matching response.
    pub requests_completed: AtomicU64,
    /// Reconnect attempts made by the supervisor.
    pub reconnect_attempts: AtomicU64,
    /// Heartbeat probes sent.
    pub heartbeats_sent: AtomicU64,
    /// Entries reaped by the pending-request sweep.
    pub swept_entries: AtomicU64,
    /// Currently registered pending requests.
    pub pending_in_flight: AtomicUsize,
    /// Currently held route locks.
    pub route_locks_held: AtomicUsize,
}

impl SessionStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            swept_entries: self.swept_entries.load(Ordering::Relaxed),
            pending_in_flight: self.pending_in_flight.load(Ordering::Relaxed),
            route_locks_held: self.route_locks_held.load(Ordering::Relaxed),
        }
    }

    /// Increment a counter by one.
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Envelopes handed to a channel.
    pub sent: u64,
    /// Envelopes decoded off the wire.
    pub received: u64,
    /// Sends rejected synchronously by the channel.
    pub send_failures: u64,
    /// Requests rejected by the token bucket.
    pub rate_limited: u64,
    /// Correlated requests that timed out.
    pub requests_timed_out: u64,
    /// Correlated requests completed by a matching response.
    pub requests_completed: u64,
    /// Reconnect attempts made by the supervisor.
    pub reconnect_attempts: u64,
    /// Heartbeat probes sent.
    pub heartbeats_sent: u64,
    /// Entries reaped by the pending-request sweep.
    pub swept_entries: u64,
    /// Currently registered pending requests.
    pub pending_in_flight: usize,
    /// Currently held route locks.
    pub route_locks_held: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = SessionStats::new();
        SessionStats::bump(&stats.sent);
        SessionStats::bump(&stats.sent);
        SessionStats::bump(&stats.rate_limited);
        stats.pending_in_flight.store(4, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.pending_in_flight, 4);
        assert_eq!(snap.received, 0);
    }
}
