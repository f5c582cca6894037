//! Transport layer: the channel abstraction and its three variants,
//! the connection state machine, and send-side admission control.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Session layer                 │
//! ├─────────────────────────────────────────┤
//! │          Transport layer                │  ← this module
//! │  channels, state machine, rate limiter  │
//! ├─────────────────────────────────────────┤
//! │        TCP / UDP / WebSocket            │
//! └─────────────────────────────────────────┘
//! ```

mod channel;
mod limiter;
mod state;
mod tcp;
mod udp;
mod ws;

pub use channel::{ChannelEvent, ChannelHandle, TransportKind};
pub use limiter::TokenBucket;
pub use state::{ConnectionState, IllegalTransition, StateMachine};

pub(crate) use channel::{ChannelOptions, open_channel};
