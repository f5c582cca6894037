//! Session layer: the client orchestrator and its supporting pieces.
//!
//! [`TetherClient`] is the public face of the crate. The submodules
//! hold the mechanisms it composes: request/response correlation,
//! heartbeat-based liveness, the reconnect policy, and the server
//! clock-offset estimate.

mod client;
mod clock;
mod correlator;
mod heartbeat;
mod reconnect;

pub use client::{SessionEvents, TetherClient};
pub use clock::ClockSync;
pub use correlator::{PendingTable, RequestIdGenerator};
pub use heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
pub use reconnect::ReconnectPolicy;
