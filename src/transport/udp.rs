//! Unreliable datagram channel over UDP.
//!
//! Each receive yields exactly one complete envelope; no framing is
//! applied. Oversized sends are rejected client-side by the handle
//! before they reach the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::core::{ConnectError, ConnectResult};

use super::channel::{
    ChannelEvent, ChannelHandle, ChannelOptions, ChannelShared, TransportKind, resolve,
};

/// Largest datagram the receive loop will accept.
const RECV_BUFFER_SIZE: usize = 65_535;

/// Open a UDP channel and start its I/O tasks.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    options: ChannelOptions,
    events: mpsc::Sender<ChannelEvent>,
) -> ConnectResult<ChannelHandle> {
    let addr = resolve(host, port).await?;
    let bind_addr: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().map_err(|_| ConnectError::Resolve {
            host: host.to_string(),
            port,
        })?
    } else {
        "[::]:0".parse().map_err(|_| ConnectError::Resolve {
            host: host.to_string(),
            port,
        })?
    };
    let socket = UdpSocket::bind(bind_addr).await.map_err(ConnectError::Io)?;
    socket.connect(addr).await.map_err(ConnectError::Io)?;
    let socket = Arc::new(socket);

    let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_queue_depth);
    let connected = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(send_loop(
        Arc::clone(&socket),
        outbound_rx,
        ChannelShared {
            events: events.clone(),
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx.clone(),
        },
    ));
    tokio::spawn(recv_loop(
        socket,
        ChannelShared {
            events,
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx,
        },
    ));

    Ok(ChannelHandle::new(
        TransportKind::Udp,
        outbound_tx,
        connected,
        shutdown_tx,
        options.max_message_size,
    ))
}

/// Drain the outbound queue, one datagram per buffer.
async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut shared: ChannelShared,
) {
    loop {
        let first = tokio::select! {
            _ = shared.shutdown.changed() => break,
            item = outbound.recv() => match item {
                Some(bytes) => bytes,
                None => break,
            },
        };

        if let Err(err) = socket.send(&first).await {
            debug!(error = %err, "udp send failed");
            shared.report_disconnect().await;
            return;
        }
        while let Ok(bytes) = outbound.try_recv() {
            if let Err(err) = socket.send(&bytes).await {
                debug!(error = %err, "udp send failed");
                shared.report_disconnect().await;
                return;
            }
        }

        if shared.events.send(ChannelEvent::SendCompleted).await.is_err() {
            return;
        }
    }
    debug!("udp send loop stopped");
}

/// Forward each received datagram as one complete message.
///
/// An ICMP-driven reset surfaces here as a receive error and ends the
/// channel; empty datagrams are dropped.
async fn recv_loop(socket: Arc<UdpSocket>, mut shared: ChannelShared) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = shared.shutdown.changed() => break,
            result = socket.recv(&mut buf) => match result {
                Ok(0) => {
                    debug!("empty datagram dropped");
                }
                Ok(n) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    if shared.events.send(ChannelEvent::Received(datagram)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "udp receive failed");
                    shared.report_disconnect().await;
                    return;
                }
            }
        }
    }
    debug!("udp receive loop stopped");
}
