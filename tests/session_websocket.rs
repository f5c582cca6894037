//! End-to-end tests over the websocket transport.
//!
//! The websocket path delegates framing to the message layer, one
//! binary message per envelope. Each test runs a scripted in-process
//! server built on `tokio_tungstenite::accept_async`, exercising the
//! handshake, the send and receive loops, and the peer-close path.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use tether::protocol::{BinaryCodec, Envelope, EnvelopeCodec, MessageKind, Route};
use tether::transport::{ConnectionState, TransportKind};
use tether::{SessionConfig, SessionEvents, TetherClient};

/// Bind a listener on an ephemeral port.
async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

async fn send_ws_envelope(
    ws: &mut WebSocketStream<TcpStream>,
    envelope: &Envelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    ws.send(Message::Binary(BinaryCodec::new().encode(envelope).into()))
        .await
}

/// Spawn a websocket server that echoes every business envelope back
/// with status 0 and answers heartbeats and time-sync probes in kind.
fn spawn_ws_echo_server(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Binary(bytes) = message else {
                        continue;
                    };
                    let Ok(envelope) = BinaryCodec::new().decode(&bytes) else {
                        continue;
                    };
                    let reply = match envelope.kind {
                        MessageKind::Business => Envelope::business(
                            envelope.route,
                            envelope.request_id,
                            envelope.payload,
                        ),
                        MessageKind::Heartbeat => Envelope::heartbeat(),
                        MessageKind::TimeSync => Envelope::time_sync(4_000_000),
                        MessageKind::Disconnect => break,
                    };
                    if send_ws_envelope(&mut ws, &reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

fn ws_config(port: u16) -> SessionConfig {
    SessionConfig::builder("127.0.0.1", port)
        .transport(TransportKind::WebSocket)
        .connect_timeout(Duration::from_secs(2))
        .request_timeout(Duration::from_secs(2))
        .auto_reconnect(false)
        .build()
}

async fn connected_client(port: u16) -> (TetherClient, SessionEvents) {
    let (client, events) = TetherClient::new(ws_config(port));
    client.connect().await.expect("connect");
    (client, events)
}

#[tokio::test]
async fn test_websocket_correlated_round_trip() {
    let (listener, port) = listen().await;
    spawn_ws_echo_server(listener);
    let (client, _events) = connected_client(port).await;

    let reply = client
        .request(Route::new(2, 7), b"marco".to_vec())
        .await
        .expect("request");
    assert_eq!(reply.route, Route::new(2, 7));
    assert_eq!(reply.payload, b"marco");
    assert_eq!(reply.status, 0);

    assert_eq!(client.stats().requests_completed, 1);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.route_locks_held(), 0);
}

#[tokio::test]
async fn test_websocket_server_push_reaches_inbound_mailbox() {
    let (listener, port) = listen().await;
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(socket).await.expect("handshake");
        // An unsolicited push: request_id 0 means uncorrelated.
        let push = Envelope::business(Route::new(9, 1), 0, b"news".to_vec());
        send_ws_envelope(&mut ws, &push).await.expect("send");
        // Hold the connection open, discarding client traffic.
        while ws.next().await.is_some() {}
    });

    let (_client, mut events) = connected_client(port).await;
    let push = tokio::time::timeout(Duration::from_secs(2), events.inbound.recv())
        .await
        .expect("push within deadline")
        .expect("mailbox open");
    assert_eq!(push.route, Route::new(9, 1));
    assert_eq!(push.payload, b"news");
    assert_eq!(push.request_id, 0);
}

#[tokio::test]
async fn test_websocket_peer_close_disconnects() {
    let (listener, port) = listen().await;
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(socket).await.expect("handshake");
        tokio::time::sleep(Duration::from_millis(100)).await;
        ws.close(None).await.expect("close");
        // Drain until the closing handshake completes.
        while ws.next().await.is_some() {}
    });

    let (client, mut events) = connected_client(port).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            events.state.changed().await.expect("state channel");
            if *events.state.borrow() == ConnectionState::Disconnected {
                break;
            }
        }
    })
    .await;
    assert!(settled.is_ok(), "peer close never surfaced");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
