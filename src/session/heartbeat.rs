//! Heartbeat liveness tracking.
//!
//! The supervisor task ticks a fixed interval and consults the monitor:
//! every tick increments the awaiting-ack counter, and the peer is
//! declared unreachable once it exceeds the configured limit. Any
//! response from the peer resets the counter to zero.

/// What the supervisor should do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Still within the miss budget: send a probe.
    SendProbe,
    /// Too many consecutive unanswered probes: force a disconnect.
    PeerUnreachable,
}

/// Counts consecutive unanswered heartbeat probes.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    misses: u32,
    max_misses: u32,
}

impl HeartbeatMonitor {
    /// Create a monitor allowing `max_misses` unanswered probes.
    pub fn new(max_misses: u32) -> Self {
        Self {
            misses: 0,
            max_misses,
        }
    }

    /// One interval elapsed: account the prospective miss and decide.
    pub fn tick(&mut self) -> HeartbeatVerdict {
        self.misses += 1;
        if self.misses > self.max_misses {
            HeartbeatVerdict::PeerUnreachable
        } else {
            HeartbeatVerdict::SendProbe
        }
    }

    /// The peer responded: clear the miss counter.
    pub fn on_response(&mut self) {
        self.misses = 0;
    }

    /// Current consecutive miss count.
    pub fn misses(&self) -> u32 {
        self.misses
    }
}
