//! Session configuration and tunables.
//!
//! All durations are monotonic-clock based. Defaults live in
//! [`defaults`] and are chosen for interactive applications on
//! consumer networks.

use std::time::Duration;

use crate::transport::TransportKind;

/// Default values for every tunable.
pub mod defaults {
    use std::time::Duration;

    /// Time allowed for the full connect sequence to settle.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Per-request response timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// Interval between heartbeat probes.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

    /// Consecutive unanswered heartbeats before the peer is declared
    /// unreachable.
    pub const HEARTBEAT_MAX_MISSES: u32 = 3;

    /// Fixed wait between reconnect attempts.
    pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

    /// Reconnect attempt cap (0 = unlimited).
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 0;

    /// Initial (and floor) capacity of the receive reassembly buffer.
    pub const RECV_BUFFER_INITIAL: usize = 16 * 1024;

    /// Sustained outbound business-message rate, per second.
    pub const MAX_SEND_RATE: u32 = 60;

    /// Token-bucket burst capacity.
    pub const MAX_BURST_SIZE: u32 = 20;

    /// Depth of a channel's bounded outbound queue.
    pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

    /// Depth of the channel-to-session event mailbox.
    pub const EVENT_MAILBOX_DEPTH: usize = 256;

    /// Depth of the inbound (server push) mailbox handed to the caller.
    pub const INBOUND_MAILBOX_DEPTH: usize = 256;

    /// Interval of the pending-request sweep.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

    /// Sweep cutoff as a multiple of the request timeout. Clamped to a
    /// minimum of 1 so the sweep never fires before the per-request
    /// timer would have.
    pub const SWEEP_MULTIPLIER: u32 = 2;

    /// Live pending-request count above which the sweep logs an
    /// overload warning.
    pub const PENDING_HIGH_WATER: usize = 256;

    /// Hard cap on a single stream frame.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Largest envelope accepted for a single datagram.
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;
}

/// Configuration for a [`TetherClient`](crate::session::TetherClient).
///
/// Built via [`SessionConfig::builder`]; every field has a sensible
/// default except `host`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Which transport variant to open.
    pub transport: TransportKind,

    /// Time allowed for the connect sequence to settle.
    pub connect_timeout: Duration,
    /// Per-request response timeout.
    pub request_timeout: Duration,

    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered probes before forcing a disconnect.
    pub heartbeat_max_misses: u32,

    /// Reconnect automatically after an unsolicited disconnect.
    pub auto_reconnect: bool,
    /// Fixed wait between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Reconnect attempt cap (0 = unlimited).
    pub max_reconnect_attempts: u32,

    /// Initial (and floor) capacity of the reassembly buffer.
    pub recv_buffer_initial: usize,
    /// Fraction of the high-water mark (in percent) below which the
    /// buffer shrinks back toward the floor.
    pub recv_buffer_shrink_threshold: u32,

    /// Gate outbound business traffic through the token bucket.
    pub rate_limit_enabled: bool,
    /// Sustained send rate, tokens per second.
    pub max_send_rate: u32,
    /// Burst capacity of the token bucket.
    pub max_burst_size: u32,

    /// Suppress a second in-flight request on the same route.
    pub request_dedup_enabled: bool,
    /// Routes exempted from deduplication.
    pub dedup_excluded_routes: Vec<u32>,

    /// Depth of a channel's bounded outbound queue.
    pub outbound_queue_depth: usize,
    /// Depth of the channel-to-session event mailbox.
    pub event_mailbox_depth: usize,
    /// Depth of the inbound (server push) mailbox.
    pub inbound_mailbox_depth: usize,

    /// Interval of the pending-request sweep.
    pub sweep_interval: Duration,
    /// Sweep cutoff as a multiple of `request_timeout` (min 1).
    pub sweep_multiplier: u32,
    /// Pending-count overload threshold.
    pub pending_high_water: usize,

    /// Hard cap on a single stream frame.
    pub max_frame_size: usize,
    /// Largest envelope accepted for a single datagram.
    pub max_datagram_size: usize,
}

impl SessionConfig {
    /// Start building a configuration for the given host and port.
    pub fn builder(host: impl Into<String>, port: u16) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig::new(host, port),
        }
    }

    /// Create a configuration with defaults for every tunable.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::Tcp,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            request_timeout: defaults::REQUEST_TIMEOUT,
            heartbeat_interval: defaults::HEARTBEAT_INTERVAL,
            heartbeat_max_misses: defaults::HEARTBEAT_MAX_MISSES,
            auto_reconnect: true,
            reconnect_interval: defaults::RECONNECT_INTERVAL,
            max_reconnect_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
            recv_buffer_initial: defaults::RECV_BUFFER_INITIAL,
            recv_buffer_shrink_threshold: 25,
            rate_limit_enabled: true,
            max_send_rate: defaults::MAX_SEND_RATE,
            max_burst_size: defaults::MAX_BURST_SIZE,
            request_dedup_enabled: true,
            dedup_excluded_routes: Vec::new(),
            outbound_queue_depth: defaults::OUTBOUND_QUEUE_DEPTH,
            event_mailbox_depth: defaults::EVENT_MAILBOX_DEPTH,
            inbound_mailbox_depth: defaults::INBOUND_MAILBOX_DEPTH,
            sweep_interval: defaults::SWEEP_INTERVAL,
            sweep_multiplier: defaults::SWEEP_MULTIPLIER,
            pending_high_water: defaults::PENDING_HIGH_WATER,
            max_frame_size: defaults::MAX_FRAME_SIZE,
            max_datagram_size: defaults::MAX_DATAGRAM_SIZE,
        }
    }

    /// Effective sweep cutoff: `request_timeout × sweep_multiplier`.
    ///
    /// The multiplier is clamped to at least 1 so the sweep acts as a
    /// pure safety net behind the per-request timer.
    pub fn sweep_cutoff(&self) -> Duration {
        self.request_timeout * self.sweep_multiplier.max(1)
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the transport variant.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = kind;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-request response timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the heartbeat probe interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the unanswered-probe limit.
    pub fn heartbeat_max_misses(mut self, misses: u32) -> Self {
        self.config.heartbeat_max_misses = misses;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the fixed wait between reconnect attempts.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set the reconnect attempt cap (0 = unlimited).
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the reassembly buffer's initial/floor capacity.
    pub fn recv_buffer_initial(mut self, size: usize) -> Self {
        self.config.recv_buffer_initial = size;
        self
    }

    /// Enable or disable the outbound rate limiter.
    pub fn rate_limit(mut self, enabled: bool) -> Self {
        self.config.rate_limit_enabled = enabled;
        self
    }

    /// Set the sustained send rate (tokens per second).
    pub fn max_send_rate(mut self, rate: u32) -> Self {
        self.config.max_send_rate = rate;
        self
    }

    /// Set the token-bucket burst capacity.
    pub fn max_burst_size(mut self, burst: u32) -> Self {
        self.config.max_burst_size = burst;
        self
    }

    /// Enable or disable per-route request deduplication.
    pub fn request_dedup(mut self, enabled: bool) -> Self {
        self.config.request_dedup_enabled = enabled;
        self
    }

    /// Exempt a route from request deduplication.
    pub fn dedup_exclude_route(mut self, route: u32) -> Self {
        self.config.dedup_excluded_routes.push(route);
        self
    }

    /// Set the pending-request sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the sweep cutoff multiplier (clamped to at least 1).
    pub fn sweep_multiplier(mut self, multiplier: u32) -> Self {
        self.config.sweep_multiplier = multiplier.max(1);
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SessionConfig::builder("example.com", 7000).build();
        assert_eq!(config.host, "example.com");
        assert_eq!(config.port, 7000);
        assert_eq!(config.connect_timeout, defaults::CONNECT_TIMEOUT);
        assert!(config.auto_reconnect);
        assert!(config.rate_limit_enabled);
        assert!(config.request_dedup_enabled);
    }

    #[test]
    fn test_sweep_cutoff_never_undercuts_request_timeout() {
        let config = SessionConfig::builder("h", 1)
            .request_timeout(Duration::from_millis(500))
            .sweep_multiplier(0)
            .build();
        assert_eq!(config.sweep_cutoff(), Duration::from_millis(500));

        let config = SessionConfig::builder("h", 1)
            .request_timeout(Duration::from_millis(500))
            .sweep_multiplier(3)
            .build();
        assert_eq!(config.sweep_cutoff(), Duration::from_millis(1500));
    }
}
