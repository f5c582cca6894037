//! The session orchestrator.
//!
//! [`TetherClient`] composes a channel, the connection state machine,
//! the rate limiter, and the request correlator into a single
//! connect/send/receive/close lifecycle. It is the only object the
//! embedding application talks to.
//!
//! Concurrency model: the channel's I/O tasks never touch session
//! state. Everything they observe crosses one bounded event mailbox
//! into the event pump, which runs the receive path. Lifecycle
//! ownership is tracked by a generation counter: every local teardown
//! (connect swap, disconnect, close) bumps the generation first, so a
//! torn-down channel or a stale supervisor can never act on the
//! session again. A disconnect event that arrives with a *current*
//! generation is by construction unsolicited, and that is what arms
//! the reconnect supervisor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};

use crate::core::{
    ConnectError, ConnectResult, RequestError, RequestResult, SendError, SendResult, SessionConfig,
    SessionStats, StatsSnapshot,
};
use crate::protocol::{
    BinaryCodec, DisconnectNotice, Envelope, EnvelopeCodec, FrameDecoder, MessageKind,
    ReassemblyBuffer, Route, encode_frame,
};
use crate::transport::{
    ChannelEvent, ChannelHandle, ChannelOptions, ConnectionState, StateMachine, TokenBucket,
    TransportKind, open_channel,
};

use super::clock::ClockSync;
use super::correlator::PendingTable;
use super::heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
use super::reconnect::ReconnectPolicy;

/// Receiver side of everything a session reports to its embedder.
pub struct SessionEvents {
    /// Non-correlated server pushes and unmatched responses.
    pub inbound: mpsc::Receiver<Envelope>,
    /// Disconnect notices, separate from the generic error surface.
    pub notices: mpsc::Receiver<DisconnectNotice>,
    /// Connection state changes, in order.
    pub state: watch::Receiver<ConnectionState>,
}

/// A client session: one long-lived connection with automatic
/// recovery.
///
/// # Example
///
/// ```ignore
/// use tether::prelude::*;
///
/// let config = SessionConfig::builder("game.example.com", 7350).build();
/// let (client, mut events) = TetherClient::new(config);
///
/// client.connect().await?;
/// let reply = client.request(Route::new(2, 1), b"hello".to_vec()).await?;
///
/// while let Some(push) = events.inbound.recv().await {
///     // route-based dispatch happens here
/// }
/// ```
pub struct TetherClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    codec: Arc<dyn EnvelopeCodec>,
    state: StateMachine,
    channel: Mutex<Option<Arc<ChannelHandle>>>,
    pending: PendingTable,
    limiter: Mutex<TokenBucket>,
    heartbeat: Mutex<HeartbeatMonitor>,
    clock: Mutex<ClockSync>,
    stats: Arc<SessionStats>,
    /// Lifecycle ownership token; see the module docs.
    generation: AtomicU64,
    closed: AtomicBool,
    reconnect_running: AtomicBool,
    /// Serializes connect sequences (user connect vs. reconnect loop).
    connect_serial: tokio::sync::Mutex<()>,
    inbound_tx: mpsc::Sender<Envelope>,
    notice_tx: mpsc::Sender<DisconnectNotice>,
}

impl TetherClient {
    /// Create a session with the default binary envelope codec.
    pub fn new(config: SessionConfig) -> (Self, SessionEvents) {
        Self::with_codec(config, Arc::new(BinaryCodec::new()))
    }

    /// Create a session with a caller-supplied envelope codec.
    pub fn with_codec(
        config: SessionConfig,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> (Self, SessionEvents) {
        let stats = Arc::new(SessionStats::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_mailbox_depth);
        let (notice_tx, notice_rx) = mpsc::channel(8);
        let state = StateMachine::new();
        let state_rx = state.subscribe();

        let inner = Arc::new(SessionInner {
            limiter: Mutex::new(TokenBucket::new(config.max_burst_size, config.max_send_rate)),
            heartbeat: Mutex::new(HeartbeatMonitor::new(config.heartbeat_max_misses)),
            clock: Mutex::new(ClockSync::new()),
            pending: PendingTable::new(Arc::clone(&stats)),
            channel: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            reconnect_running: AtomicBool::new(false),
            connect_serial: tokio::sync::Mutex::new(()),
            config,
            codec,
            state,
            stats,
            inbound_tx,
            notice_tx,
        });

        (
            Self { inner },
            SessionEvents {
                inbound: inbound_rx,
                notices: notice_rx,
                state: state_rx,
            },
        )
    }

    /// Establish the connection.
    ///
    /// Only legal from `Disconnected`. On failure the half-built
    /// channel is torn down and the state falls back to
    /// `Disconnected`.
    pub async fn connect(&self) -> ConnectResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConnectError::ClientClosed);
        }
        self.inner
            .state
            .transition(ConnectionState::Connecting)
            .map_err(|err| ConnectError::NotDisconnected {
                state: err.from.name(),
            })?;

        match establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.inner.state.transition(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Fire-and-forget business message. Subject to the rate limiter.
    pub fn notify(&self, route: Route, payload: Vec<u8>) -> RequestResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(RequestError::ClientClosed);
        }
        if inner.state.current() != ConnectionState::Connected {
            return Err(RequestError::Send(SendError::NotConnected));
        }
        inner.admit(MessageKind::Business)?;
        inner
            .send_envelope(&Envelope::business(route, 0, payload))
            .map_err(RequestError::Send)
    }

    /// Correlated request: send and await the matching response.
    ///
    /// Fails fast on a duplicate in-flight route (when dedup applies)
    /// or an exhausted token bucket; otherwise waits up to the
    /// configured request timeout. On every exit path the pending
    /// entry and the route lock are released exactly once.
    pub async fn request(&self, route: Route, payload: Vec<u8>) -> RequestResult<Envelope> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(RequestError::ClientClosed);
        }
        if inner.state.current() != ConnectionState::Connected {
            return Err(RequestError::Send(SendError::NotConnected));
        }

        let packed = route.packed();
        let dedup = inner.config.request_dedup_enabled
            && !inner.config.dedup_excluded_routes.contains(&packed);
        let locked = if dedup {
            if !inner.pending.lock_route(packed) {
                return Err(RequestError::RouteBusy { route: packed });
            }
            true
        } else {
            false
        };

        if let Err(err) = inner.admit(MessageKind::Business) {
            if locked {
                inner.pending.unlock_route(packed);
            }
            return Err(err);
        }

        let request_id = inner.pending.next_id();
        let receiver = match inner.pending.register(request_id, packed, locked) {
            Ok(receiver) => receiver,
            Err(err) => {
                if locked {
                    inner.pending.unlock_route(packed);
                }
                return Err(err);
            }
        };

        // Every exit below this point, including the caller dropping
        // this future mid-await, releases the entry through the guard
        // unless the completer got there first.
        let mut guard = PendingGuard {
            pending: &inner.pending,
            request_id,
            armed: true,
        };

        let envelope = Envelope::business(route, request_id, payload);
        if let Err(err) = inner.send_envelope(&envelope) {
            return Err(RequestError::Send(err));
        }

        match timeout(inner.config.request_timeout, receiver).await {
            Ok(Ok(result)) => {
                // The completer already removed the entry and released
                // the route lock.
                guard.disarm();
                let response = result?;
                if response.status != 0 {
                    return Err(RequestError::Rejected {
                        status: response.status,
                        message: response.error_text,
                    });
                }
                Ok(response)
            }
            Ok(Err(_closed)) => {
                // Sender dropped without a verdict; treat as a timeout.
                SessionStats::bump(&inner.stats.requests_timed_out);
                Err(RequestError::Timeout)
            }
            Err(_elapsed) => {
                SessionStats::bump(&inner.stats.requests_timed_out);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Raw send: enqueue an envelope as-is. Never blocks, bypasses the
    /// limiter and the correlator, still recorded in the statistics.
    pub fn send_raw(&self, envelope: &Envelope) -> SendResult<()> {
        self.inner.send_envelope(envelope)
    }

    /// Tear down the channel and return to `Disconnected`.
    ///
    /// A solicited disconnect: the reconnect supervisor does not run.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(channel) = lock(&inner.channel).take() {
            channel.disconnect();
        }
        let _ = inner.state.transition(ConnectionState::Disconnected);
        info!("session disconnected");
    }

    /// Permanently close the session.
    ///
    /// One-way: stops every supervisor, fails every pending request
    /// with a client-closed error, releases every route lock, and
    /// moves to the terminal `Closed` state. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.inner.state.current() == ConnectionState::Connected
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Live correlated requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    /// Route locks currently held.
    pub fn route_locks_held(&self) -> usize {
        self.inner.pending.locked_count()
    }

    /// Estimated server/local clock offset in milliseconds, if a
    /// time-sync sample has arrived.
    pub fn clock_offset_millis(&self) -> Option<i64> {
        let clock = lock(&self.inner.clock);
        clock.is_initialized().then(|| clock.offset_millis())
    }

    /// Estimated current server time in milliseconds since the epoch.
    pub fn server_time_millis(&self) -> i64 {
        lock(&self.inner.clock).server_time_millis(local_now_millis())
    }
}

impl Drop for TetherClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl SessionInner {
    /// Rate-limiter admission for one outbound message.
    fn admit(&self, kind: MessageKind) -> RequestResult<()> {
        if kind.is_rate_limit_exempt() || !self.config.rate_limit_enabled {
            return Ok(());
        }
        if lock(&self.limiter).try_acquire() {
            Ok(())
        } else {
            SessionStats::bump(&self.stats.rate_limited);
            Err(RequestError::RateLimited)
        }
    }

    /// Encode an envelope and enqueue it on the live channel.
    fn send_envelope(&self, envelope: &Envelope) -> SendResult<()> {
        let channel = lock(&self.channel)
            .as_ref()
            .map(Arc::clone)
            .ok_or(SendError::NotConnected)?;

        let encoded = self.codec.encode(envelope);
        if encoded.len() > self.config.max_frame_size {
            SessionStats::bump(&self.stats.send_failures);
            return Err(SendError::DataTooLarge {
                size: encoded.len(),
                limit: self.config.max_frame_size,
            });
        }
        let wire = if channel.kind().is_framed() {
            Bytes::from(encode_frame(&encoded))
        } else {
            Bytes::from(encoded)
        };

        match channel.send(wire) {
            Ok(()) => {
                SessionStats::bump(&self.stats.sent);
                Ok(())
            }
            Err(err) => {
                SessionStats::bump(&self.stats.send_failures);
                Err(err)
            }
        }
    }

    /// Terminal teardown shared by `close` and `Drop`. Idempotent.
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(channel) = lock(&self.channel).take() {
            channel.disconnect();
        }
        self.pending.fail_all(|| RequestError::ClientClosed);
        let _ = self.state.transition(ConnectionState::Closed);
        info!("session closed");
    }
}

/// Open a fresh channel, swap it in, and start the supervisors.
///
/// The caller has already moved the state machine to `Connecting` and
/// owns the fallback on failure.
async fn establish(inner: &Arc<SessionInner>) -> ConnectResult<()> {
    let _serial = inner.connect_serial.lock().await;
    if inner.closed.load(Ordering::Acquire) {
        return Err(ConnectError::ClientClosed);
    }

    // Taking ownership of the lifecycle up front detaches every stale
    // supervisor and the previous channel's event pump.
    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

    let (events_tx, events_rx) = mpsc::channel(inner.config.event_mailbox_depth);
    let options = ChannelOptions {
        outbound_queue_depth: inner.config.outbound_queue_depth,
        max_message_size: match inner.config.transport {
            TransportKind::Tcp => None,
            TransportKind::Udp => Some(inner.config.max_datagram_size),
            TransportKind::WebSocket => Some(inner.config.max_frame_size),
        },
    };

    let opened = timeout(
        inner.config.connect_timeout,
        open_channel(
            inner.config.transport,
            &inner.config.host,
            inner.config.port,
            options,
            events_tx,
        ),
    )
    .await;
    let handle = match opened {
        Ok(Ok(handle)) => handle,
        Ok(Err(err)) => return Err(err),
        Err(_elapsed) => return Err(ConnectError::Timeout),
    };

    let old = lock(&inner.channel).replace(Arc::new(handle));
    if let Some(old) = old {
        old.disconnect();
    }

    if inner.state.transition(ConnectionState::Connected).is_err() {
        // Closed raced us; give the fresh channel back.
        if let Some(channel) = lock(&inner.channel).take() {
            channel.disconnect();
        }
        return Err(ConnectError::ClientClosed);
    }

    lock(&inner.heartbeat).on_response();
    tokio::spawn(event_pump(Arc::clone(inner), events_rx, generation));
    tokio::spawn(heartbeat_supervisor(Arc::clone(inner), generation));
    tokio::spawn(sweep_supervisor(Arc::clone(inner), generation));

    // Prime the clock-offset estimate.
    let _ = inner.send_envelope(&Envelope::time_sync(local_now_millis()));

    info!(
        host = %inner.config.host,
        port = inner.config.port,
        transport = ?inner.config.transport,
        "session connected"
    );
    Ok(())
}

/// React to the current channel going down without a local request.
///
/// The compare-exchange on the generation makes stale callers no-ops,
/// so this runs at most once per live channel.
fn on_channel_down(inner: &Arc<SessionInner>, generation: u64) {
    if inner.closed.load(Ordering::Acquire) {
        return;
    }
    if inner
        .generation
        .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    if let Some(channel) = lock(&inner.channel).take() {
        channel.disconnect();
    }

    if inner.config.auto_reconnect
        && inner.state.transition(ConnectionState::Reconnecting).is_ok()
    {
        info!("connection lost; reconnect supervisor engaged");
        spawn_reconnect(inner, generation + 1);
    } else {
        info!("connection lost");
        let _ = inner.state.transition(ConnectionState::Disconnected);
    }
}

/// Handle a server-initiated disconnect notice.
fn on_server_disconnect(inner: &Arc<SessionInner>, notice: DisconnectNotice, generation: u64) {
    info!(reason = ?notice.reason, detail = %notice.detail, "server-initiated disconnect");
    let allows_reconnect = notice.reason.allows_reconnect();
    let _ = inner.notice_tx.try_send(notice);
    if allows_reconnect {
        on_channel_down(inner, generation);
    } else {
        inner.shutdown();
    }
}

/// Dispatch one decoded envelope.
async fn dispatch(inner: &Arc<SessionInner>, envelope: Envelope, generation: u64) {
    SessionStats::bump(&inner.stats.received);
    // Any traffic proves the peer alive.
    lock(&inner.heartbeat).on_response();

    match envelope.kind {
        MessageKind::Heartbeat => {}
        MessageKind::TimeSync => {
            if envelope.payload.len() >= 8 {
                let mut sample = [0u8; 8];
                sample.copy_from_slice(&envelope.payload[..8]);
                lock(&inner.clock).update(i64::from_be_bytes(sample), local_now_millis());
            } else {
                debug!("short time-sync payload ignored");
            }
        }
        MessageKind::Disconnect => {
            // Cannot fail: the kind is already matched.
            if let Ok(notice) = DisconnectNotice::from_envelope(&envelope) {
                on_server_disconnect(inner, notice, generation);
            }
        }
        MessageKind::Business => {
            let unmatched = if envelope.is_correlated() {
                inner.pending.try_complete(envelope.request_id, envelope)
            } else {
                Some(envelope)
            };
            if let Some(push) = unmatched {
                if inner.inbound_tx.send(push).await.is_err() {
                    debug!("inbound mailbox closed; push dropped");
                }
            }
        }
    }
}

/// Start the reconnect supervisor; at most one sequence runs at a time.
///
/// The supervisor is armed with the generation produced by the
/// teardown that engaged it. Any later local teardown (a solicited
/// disconnect, a close) bumps the counter past `generation` and the
/// sequence stops before its next attempt.
fn spawn_reconnect(inner: &Arc<SessionInner>, generation: u64) {
    if inner.reconnect_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let mut armed = generation;
        let mut policy = ReconnectPolicy::new(
            inner.config.max_reconnect_attempts,
            inner.config.reconnect_interval,
        );
        loop {
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            if inner.generation.load(Ordering::SeqCst) != armed {
                debug!("reconnect sequence detached by a local teardown");
                break;
            }
            let Some(wait) = policy.next_attempt() else {
                info!(
                    attempts = policy.attempts(),
                    "reconnect attempts exhausted; settling disconnected"
                );
                let _ = inner.state.transition(ConnectionState::Disconnected);
                break;
            };
            SessionStats::bump(&inner.stats.reconnect_attempts);
            time::sleep(wait).await;
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            if inner.generation.load(Ordering::SeqCst) != armed {
                debug!("reconnect sequence detached by a local teardown");
                break;
            }
            if inner.state.transition(ConnectionState::Connecting).is_err() {
                break;
            }
            match establish(&inner).await {
                Ok(()) => {
                    info!(attempt = policy.attempts(), "reconnected");
                    break;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        attempt = policy.attempts(),
                        "reconnect attempt failed"
                    );
                    // A failed establish still claimed the next
                    // generation; follow it or the stale check above
                    // would end the sequence early.
                    armed += 1;
                    let _ = inner.state.transition(ConnectionState::Disconnected);
                }
            }
        }
        inner.reconnect_running.store(false, Ordering::SeqCst);
    });
}

/// Consumes channel events for one channel generation: reassembly,
/// decoding, and dispatch all run here, never on an I/O task.
async fn event_pump(
    inner: Arc<SessionInner>,
    mut events: mpsc::Receiver<ChannelEvent>,
    generation: u64,
) {
    let framed = inner.config.transport.is_framed();
    let mut decoder = FrameDecoder::new(
        ReassemblyBuffer::new(
            inner.config.recv_buffer_initial,
            inner.config.recv_buffer_shrink_threshold,
            inner.config.max_frame_size,
        ),
        Arc::clone(&inner.codec),
    );

    while let Some(event) = events.recv().await {
        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        match event {
            ChannelEvent::Received(bytes) => {
                let envelopes = if framed {
                    match decoder.push(&bytes) {
                        Ok(envelopes) => envelopes,
                        Err(err) => {
                            error!(error = %err, "protocol error; tearing down the connection");
                            on_channel_down(&inner, generation);
                            break;
                        }
                    }
                } else {
                    match inner.codec.decode(&bytes) {
                        Ok(envelope) => vec![envelope],
                        Err(err) => {
                            error!(error = %err, "undecodable message; tearing down the connection");
                            on_channel_down(&inner, generation);
                            break;
                        }
                    }
                };
                for envelope in envelopes {
                    dispatch(&inner, envelope, generation).await;
                }
            }
            ChannelEvent::SendCompleted => {}
            ChannelEvent::Disconnected => {
                on_channel_down(&inner, generation);
                break;
            }
        }
    }
    debug!(generation, "event pump stopped");
}

/// Fixed-interval heartbeat probes with miss-based failure detection.
async fn heartbeat_supervisor(inner: Arc<SessionInner>, generation: u64) {
    let mut ticker = time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if inner.generation.load(Ordering::SeqCst) != generation
            || inner.closed.load(Ordering::Acquire)
            || inner.state.current() != ConnectionState::Connected
        {
            break;
        }
        let (verdict, misses) = {
            let mut monitor = lock(&inner.heartbeat);
            (monitor.tick(), monitor.misses())
        };
        match verdict {
            HeartbeatVerdict::PeerUnreachable => {
                warn!(misses, "heartbeat budget exhausted; forcing disconnect");
                on_channel_down(&inner, generation);
                break;
            }
            HeartbeatVerdict::SendProbe => {
                SessionStats::bump(&inner.stats.heartbeats_sent);
                if let Err(err) = inner.send_envelope(&Envelope::heartbeat()) {
                    debug!(error = %err, "heartbeat send failed");
                }
                let _ = inner.send_envelope(&Envelope::time_sync(local_now_millis()));
            }
        }
    }
    debug!(generation, "heartbeat supervisor stopped");
}

/// Periodic pending-request sweep: a safety net behind the per-request
/// timers.
async fn sweep_supervisor(inner: Arc<SessionInner>, generation: u64) {
    let mut ticker = time::interval(inner.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if inner.generation.load(Ordering::SeqCst) != generation
            || inner.closed.load(Ordering::Acquire)
        {
            break;
        }
        let swept = inner
            .pending
            .sweep(inner.config.sweep_cutoff(), inner.config.pending_high_water);
        if swept > 0 {
            debug!(swept, "pending sweep reaped entries");
        }
    }
    debug!(generation, "sweep supervisor stopped");
}

/// Removes a pending entry, and with it the route lock it holds, when
/// the request path exits without a completion. Covers the error
/// returns, the timeout, and the caller dropping the request future
/// before a verdict arrives.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    request_id: i32,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.abort(self.request_id);
        }
    }
}

/// Local wall clock in milliseconds since the Unix epoch.
fn local_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> SessionConfig {
        SessionConfig::builder("127.0.0.1", port)
            .auto_reconnect(false)
            .connect_timeout(Duration::from_secs(2))
            .request_timeout(Duration::from_millis(100))
            .build()
    }

    async fn quiet_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Accept connections and keep them open, discarding input.
    fn hold_connection(listener: TcpListener) {
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut sink = vec![0u8; 4096];
                    loop {
                        match socket.read(&mut sink).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn test_connect_then_close() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let (client, _events) = TetherClient::new(test_config(port));
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
        // Idempotent.
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_rejected_while_connected() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let (client, _events) = TetherClient::new(test_config(port));
        client.connect().await.unwrap();

        let second = client.connect().await;
        assert!(matches!(
            second,
            Err(ConnectError::NotDisconnected { state: "connected" })
        ));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_after_close_rejected() {
        let (client, _events) = TetherClient::new(test_config(1));
        client.close();
        assert!(matches!(
            client.connect().await,
            Err(ConnectError::ClientClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let (client, _events) = TetherClient::new(test_config(1));
        let result = client.request(Route::new(1, 1), vec![]).await;
        assert!(matches!(
            result,
            Err(RequestError::Send(SendError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_releases_resources() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let (client, _events) = TetherClient::new(test_config(port));
        client.connect().await.unwrap();

        let started = tokio::time::Instant::now();
        let result = client.request(Route::new(1, 1), b"ping".to_vec()).await;
        assert!(matches!(result, Err(RequestError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.route_locks_held(), 0);
        assert_eq!(client.stats().requests_timed_out, 1);
    }

    #[tokio::test]
    async fn test_route_dedup_blocks_second_request() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let mut config = test_config(port);
        config.request_timeout = Duration::from_millis(300);
        let (client, _events) = TetherClient::new(config);
        let client = Arc::new(client);
        client.connect().await.unwrap();

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(Route::new(9, 9), vec![1]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = client.request(Route::new(9, 9), vec![2]).await;
        assert!(matches!(second, Err(RequestError::RouteBusy { .. })));

        // A different route is unaffected by the lock.
        let other = client.request(Route::new(9, 10), vec![3]).await;
        assert!(matches!(other, Err(RequestError::Timeout)));

        assert!(matches!(
            first.await.unwrap(),
            Err(RequestError::Timeout)
        ));
        assert_eq!(client.route_locks_held(), 0);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_route_lock() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let mut config = test_config(port);
        config.request_timeout = Duration::from_secs(5);
        config.sweep_interval = Duration::from_secs(60);
        let (client, _events) = TetherClient::new(config);
        let client = Arc::new(client);
        client.connect().await.unwrap();

        let abandoned = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(Route::new(7, 7), vec![1]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending_count(), 1);
        assert_eq!(client.route_locks_held(), 1);

        // Cancelling the caller must release the entry at once, not
        // leave it for the sweep.
        abandoned.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.route_locks_held(), 0);

        // The route is immediately usable again.
        let retry = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(Route::new(7, 7), vec![2]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.route_locks_held(), 1, "retry failed to take the lock");

        client.close();
        assert!(matches!(
            retry.await.unwrap(),
            Err(RequestError::ClientClosed)
        ));
    }

    #[tokio::test]
    async fn test_rate_limiter_gates_notify() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let mut config = test_config(port);
        config.max_burst_size = 2;
        config.max_send_rate = 1;
        let (client, _events) = TetherClient::new(config);
        client.connect().await.unwrap();

        assert!(client.notify(Route::new(1, 1), vec![1]).is_ok());
        assert!(client.notify(Route::new(1, 1), vec![2]).is_ok());
        assert!(matches!(
            client.notify(Route::new(1, 1), vec![3]),
            Err(RequestError::RateLimited)
        ));
        assert_eq!(client.stats().rate_limited, 1);

        // Heartbeats bypass the bucket entirely.
        assert!(client.send_raw(&Envelope::heartbeat()).is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let mut config = test_config(port);
        config.request_timeout = Duration::from_secs(5);
        let (client, _events) = TetherClient::new(config);
        let client = Arc::new(client);
        client.connect().await.unwrap();

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(Route::new(4, 4), vec![]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.pending_count(), 1);

        client.close();
        assert!(matches!(
            pending.await.unwrap(),
            Err(RequestError::ClientClosed)
        ));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.route_locks_held(), 0);
    }

    #[tokio::test]
    async fn test_connect_timeout_to_unreachable_host() {
        // TEST-NET-1 blackholes on most networks; either way the
        // attempt must fail quickly and fall back to Disconnected.
        let mut config = SessionConfig::builder("192.0.2.1", 81)
            .connect_timeout(Duration::from_millis(200))
            .auto_reconnect(false)
            .build();
        config.request_timeout = Duration::from_millis(100);

        let (client, _events) = TetherClient::new(config);
        let started = tokio::time::Instant::now();
        let result = client.connect().await;

        assert!(result.is_err());
        // The configured 200ms timeout bounds the attempt; anything
        // beyond a small scheduling margin means it was ignored.
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_solicited() {
        let (listener, port) = quiet_listener().await;
        hold_connection(listener);

        let mut config = test_config(port);
        config.auto_reconnect = true;
        let (client, _events) = TetherClient::new(config);
        client.connect().await.unwrap();

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // No reconnect supervisor may run after a local disconnect.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.stats().reconnect_attempts, 0);

        // The session stays usable after a local disconnect.
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
    }
}
