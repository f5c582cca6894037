//! Reliable stream channel over TCP.
//!
//! Stream reads have no message boundaries; the owner runs the frame
//! codec over whatever chunks arrive. Nagle-style coalescing is
//! disabled at connect time since the engine serves latency-sensitive
//! traffic.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::core::{ConnectError, ConnectResult};

use super::channel::{
    ChannelEvent, ChannelHandle, ChannelOptions, ChannelShared, TransportKind, resolve,
};

/// Read chunk size for the receive loop.
const READ_CHUNK: usize = 8 * 1024;

/// Open a TCP channel and start its I/O tasks.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    options: ChannelOptions,
    events: mpsc::Sender<ChannelEvent>,
) -> ConnectResult<ChannelHandle> {
    let addr = resolve(host, port).await?;
    let stream = TcpStream::connect(addr).await.map_err(ConnectError::Io)?;
    stream.set_nodelay(true).map_err(ConnectError::Io)?;
    let (reader, writer) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_queue_depth);
    let connected = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(send_loop(
        writer,
        outbound_rx,
        ChannelShared {
            events: events.clone(),
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx.clone(),
        },
    ));
    tokio::spawn(recv_loop(
        reader,
        ChannelShared {
            events,
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx,
        },
    ));

    Ok(ChannelHandle::new(
        TransportKind::Tcp,
        outbound_tx,
        connected,
        shutdown_tx,
        None,
    ))
}

/// Drain the outbound queue, flushing each buffer completely.
async fn send_loop(
    mut writer: OwnedWriteHalf,
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

        if let Err(err) = writer.write_all(&first).await {
            debug!(error = %err, "tcp write failed");
            shared.report_disconnect().await;
            return;
        }
        // Drain the whole queue in the same wake-up.
        while let Ok(bytes) = outbound.try_recv() {
            if let Err(err) = writer.write_all(&bytes).await {
                debug!(error = %err, "tcp write failed");
                shared.report_disconnect().await;
                return;
            }
        }

        if shared.events.send(ChannelEvent::SendCompleted).await.is_err() {
            return;
        }
    }
    debug!("tcp send loop stopped");
}

/// Forward raw read chunks upward until the peer or the owner ends the
/// connection. A zero-byte read is the peer closing.
async fn recv_loop(mut reader: OwnedReadHalf, mut shared: ChannelShared) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = shared.shutdown.changed() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("tcp peer closed");
                    shared.report_disconnect().await;
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if shared.events.send(ChannelEvent::Received(chunk)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "tcp read failed");
                    shared.report_disconnect().await;
                    return;
                }
            }
        }
    }
    debug!("tcp receive loop stopped");
}
