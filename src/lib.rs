//! # Tether
//!
//! Tether is a client-side transport-and-session engine for long-lived
//! connections to a message-oriented server. It provides:
//!
//! - **Transports**: TCP, UDP, and WebSocket behind one channel
//!   abstraction, with length-prefixed framing and reassembly where the
//!   transport needs it
//! - **Lifecycle**: an explicit connection state machine with observable
//!   transitions, heartbeat-based liveness, and supervised reconnection
//! - **Correlation**: request/response matching by generated request id,
//!   with per-route in-flight deduplication and a periodic leak sweep
//! - **Flow control**: token-bucket admission on outbound business
//!   traffic, bounded queues end to end
//!
//! ## Modules
//!
//! - [`core`]: configuration, the error taxonomy, and session counters
//! - [`protocol`]: the envelope model, the pluggable codec, and stream
//!   framing
//! - [`transport`]: channels, the state machine, and the rate limiter
//! - [`session`]: the [`TetherClient`](session::TetherClient)
//!   orchestrator and its supervisors
//!
//! ## Example Usage
//!
//! ```no_run
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::builder("game.example.com", 7350)
//!     .transport(TransportKind::Tcp)
//!     .build();
//! let (client, mut events) = TetherClient::new(config);
//!
//! client.connect().await?;
//!
//! // A correlated request: resolves with the matching response.
//! let reply = client.request(Route::new(2, 1), b"hello".to_vec()).await?;
//! println!("status {}: {} bytes", reply.status, reply.payload.len());
//!
//! // Server pushes and unmatched responses arrive on the event side.
//! while let Some(push) = events.inbound.recv().await {
//!     println!("push on route {}", push.route);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod protocol;
pub mod session;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        ConnectError, RequestError, SendError, SessionConfig, StatsSnapshot,
    };
    pub use crate::protocol::{
        DisconnectNotice, DisconnectReason, Envelope, EnvelopeCodec, MessageKind, Route,
    };
    pub use crate::session::{SessionEvents, TetherClient};
    pub use crate::transport::{ConnectionState, TransportKind};
}

// Re-export commonly used items at crate root
pub use crate::core::{RequestError, SessionConfig};
pub use crate::protocol::{Envelope, Route};
pub use crate::session::{SessionEvents, TetherClient};
pub use crate::transport::{ConnectionState, TransportKind};
