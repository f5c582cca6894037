//! Wire protocol: the envelope model, the pluggable envelope codec,
//! and stream framing/reassembly.

mod codec;
mod envelope;
mod reassembly;

pub use codec::{BinaryCodec, EnvelopeCodec};
pub use envelope::{DisconnectNotice, DisconnectReason, Envelope, MessageKind, Route};
pub use reassembly::{FrameDecoder, LENGTH_PREFIX_SIZE, ReassemblyBuffer, encode_frame};
