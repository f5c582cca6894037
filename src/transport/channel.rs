//! The channel abstraction: one connect/send/receive primitive per
//! transport variant.
//!
//! A channel is created for every connect attempt and never reused. It
//! owns the raw transport plus two dedicated I/O tasks:
//!
//! - the send loop drains the bounded outbound queue, flushing every
//!   buffer completely per wake-up;
//! - the receive loop blocks on the transport and forwards received
//!   bytes upward.
//!
//! Both tasks report to the owner exclusively through the bounded
//! [`ChannelEvent`] mailbox, so the owner's logic never runs on an I/O
//! task and gains natural backpressure if it falls behind. Both tasks
//! watch a shutdown signal and exit promptly on disposal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::net::lookup_host;
use tokio::sync::{mpsc, watch};

use crate::core::{ConnectError, ConnectResult, SendError, SendResult};

use super::{tcp, udp, ws};

/// Which transport variant a channel runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Reliable ordered byte stream; requires framing.
    Tcp,
    /// Unreliable datagrams; one envelope per datagram.
    Udp,
    /// Message-oriented socket; framing and ordering delegated to the
    /// transport. For hosts where raw sockets are unavailable.
    WebSocket,
}

impl TransportKind {
    /// Whether this transport needs the stream frame codec.
    pub fn is_framed(self) -> bool {
        matches!(self, TransportKind::Tcp)
    }
}

/// Notifications a channel sends its owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Raw bytes arrived. For stream transports these are arbitrary
    /// read chunks; for datagram and message transports, exactly one
    /// complete envelope.
    Received(Bytes),
    /// The send loop flushed its queue.
    SendCompleted,
    /// The transport ended without a local disconnect request.
    Disconnected,
}

/// Tunables a channel is opened with.
#[derive(Debug, Clone)]
pub(crate) struct ChannelOptions {
    /// Depth of the bounded outbound queue.
    pub outbound_queue_depth: usize,
    /// Client-side cap on a single outbound message, where the
    /// transport has one (datagram, websocket).
    pub max_message_size: Option<usize>,
}

/// Owner-side handle to a live channel.
///
/// Dropping the handle disconnects the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    kind: TransportKind,
    outbound: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    max_message_size: Option<usize>,
}

impl ChannelHandle {
    pub(crate) fn new(
        kind: TransportKind,
        outbound: mpsc::Sender<Bytes>,
        connected: Arc<AtomicBool>,
        shutdown: watch::Sender<bool>,
        max_message_size: Option<usize>,
    ) -> Self {
        Self {
            kind,
            outbound,
            connected,
            shutdown,
            max_message_size,
        }
    }

    /// The transport variant this channel runs on.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Enqueue bytes for sending. Never blocks the caller.
    pub fn send(&self, bytes: Bytes) -> SendResult<()> {
        if bytes.is_empty() {
            return Err(SendError::InvalidData);
        }
        if let Some(limit) = self.max_message_size {
            if bytes.len() > limit {
                return Err(SendError::DataTooLarge {
                    size: bytes.len(),
                    limit,
                });
            }
        }
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        self.outbound.try_send(bytes).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Whether the transport is currently believed connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Tear the channel down. Idempotent; the I/O tasks exit promptly.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.shutdown.send_replace(true);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Shared per-channel plumbing handed to a variant's I/O tasks.
pub(crate) struct ChannelShared {
    pub events: mpsc::Sender<ChannelEvent>,
    pub connected: Arc<AtomicBool>,
    pub shutdown: watch::Receiver<bool>,
}

impl ChannelShared {
    /// Mark the transport dead and notify the owner, once.
    ///
    /// Swallows the mailbox error: if the owner is gone there is nobody
    /// left to tell.
    pub async fn report_disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(ChannelEvent::Disconnected).await;
        }
    }
}

/// Open a channel of the given kind.
pub(crate) async fn open_channel(
    kind: TransportKind,
    host: &str,
    port: u16,
    options: ChannelOptions,
    events: mpsc::Sender<ChannelEvent>,
) -> ConnectResult<ChannelHandle> {
    match kind {
        TransportKind::Tcp => tcp::connect(host, port, options, events).await,
        TransportKind::Udp => udp::connect(host, port, options, events).await,
        TransportKind::WebSocket => ws::connect(host, port, options, events).await,
    }
}

/// Resolve a host/port pair to the first usable socket address.
pub(crate) async fn resolve(host: &str, port: u16) -> ConnectResult<SocketAddr> {
    let mut addrs = lookup_host((host, port)).await.map_err(ConnectError::Io)?;
    addrs.next().ok_or_else(|| ConnectError::Resolve {
        host: host.to_string(),
        port,
    })
}
