//! Core types shared across the engine: configuration, the error
//! taxonomy, and session counters.

mod config;
mod error;
mod stats;

pub use config::{SessionConfig, SessionConfigBuilder, defaults};
pub use error::{
    CodecError, ConnectError, ConnectResult, ProtocolError, RequestError, RequestResult,
    SendError, SendResult,
};
pub use stats::{SessionStats, StatsSnapshot};
