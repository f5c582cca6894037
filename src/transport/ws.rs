//! Message-oriented channel over WebSocket.
//!
//! Framing and ordering are delegated to the websocket layer: each
//! binary message carries exactly one envelope. Used on hosts where raw
//! sockets are unavailable.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::core::{ConnectError, ConnectResult};

use super::channel::{ChannelEvent, ChannelHandle, ChannelOptions, ChannelShared, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket channel and start its I/O tasks.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    options: ChannelOptions,
    events: mpsc::Sender<ChannelEvent>,
) -> ConnectResult<ChannelHandle> {
    let url = format!("ws://{host}:{port}/");
    let (stream, _response) = connect_async(&url)
        .await
        .map_err(|err| ConnectError::Handshake(err.to_string()))?;
    let (sink, source) = stream.split();

    let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_queue_depth);
    let connected = Arc::new(AtomicBool::new(true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(send_loop(
        sink,
        outbound_rx,
        ChannelShared {
            events: events.clone(),
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx.clone(),
        },
    ));
    tokio::spawn(recv_loop(
        source,
        ChannelShared {
            events,
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx,
        },
    ));

    Ok(ChannelHandle::new(
        TransportKind::WebSocket,
        outbound_tx,
        connected,
        shutdown_tx,
        options.max_message_size,
    ))
}

/// Drain the outbound queue, one binary message per buffer.
async fn send_loop(
    mut sink: SplitSink<WsStream, Message>,
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

        if let Err(err) = sink.send(Message::Binary(first.into())).await {
            debug!(error = %err, "websocket send failed");
            shared.report_disconnect().await;
            return;
        }
        while let Ok(bytes) = outbound.try_recv() {
            if let Err(err) = sink.send(Message::Binary(bytes.into())).await {
                debug!(error = %err, "websocket send failed");
                shared.report_disconnect().await;
                return;
            }
        }

        if shared.events.send(ChannelEvent::SendCompleted).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
    debug!("websocket send loop stopped");
}

/// Forward each binary message as one complete envelope.
async fn recv_loop(mut source: SplitStream<WsStream>, mut shared: ChannelShared) {
    loop {
        tokio::select! {
            _ = shared.shutdown.changed() => break,
            message = source.next() => match message {
                Some(Ok(Message::Binary(bytes))) => {
                    if shared.events.send(ChannelEvent::Received(bytes)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("websocket peer closed");
                    shared.report_disconnect().await;
                    return;
                }
                // Pings are answered by the websocket layer; text and
                // pong frames carry nothing for the engine.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "websocket receive failed");
                    shared.report_disconnect().await;
                    return;
                }
            }
        }
    }
    debug!("websocket receive loop stopped");
}
