//! Error types for the TETHER engine.
//!
//! The taxonomy mirrors the four failure classes of the engine:
//! - [`ConnectError`]: failures establishing a session
//! - [`SendError`]: synchronous failures on the outbound path
//! - [`RequestError`]: failures of the correlated request/response path
//! - [`ProtocolError`]: wire-level corruption, fatal for the connection
//!
//! Timeouts and rate-limit rejections are expected, recoverable outcomes
//! the caller should anticipate, not programmer errors.

use std::io;

use thiserror::Error;

/// Errors that can occur while establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The session is not in a state that allows connecting.
    #[error("cannot connect while {state}")]
    NotDisconnected {
        /// The state the session was in.
        state: &'static str,
    },

    /// The connect attempt did not settle within the configured timeout.
    #[error("connect timed out")]
    Timeout,

    /// Host name resolution produced no usable address.
    #[error("failed to resolve {host}:{port}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Port used for resolution.
        port: u16,
    },

    /// Transport-level I/O failure while opening the connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket handshake failure.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// The session has been permanently closed.
    #[error("client closed")]
    ClientClosed,
}

/// Errors returned synchronously from the send path.
///
/// These map one-to-one onto the channel's send failures and are never
/// surfaced as a generic unchecked fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No live channel to send on.
    #[error("not connected")]
    NotConnected,

    /// The payload is empty or otherwise unsendable.
    #[error("invalid data")]
    InvalidData,

    /// The bounded outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// The channel has been torn down.
    #[error("channel closed")]
    ChannelClosed,

    /// The payload exceeds the transport's message-size limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    DataTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// The transport's limit.
        limit: usize,
    },
}

impl SendError {
    /// Check whether retrying the same send later could succeed.
    ///
    /// `QueueFull` and `NotConnected` are transient; the rest indicate
    /// the payload or the channel itself is unusable.
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::QueueFull | SendError::NotConnected)
    }
}

/// Errors returned from the correlated request/response path.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Another request on the same route is already in flight.
    #[error("request already in flight for route {route:#010x}")]
    RouteBusy {
        /// The contested route.
        route: u32,
    },

    /// A pending entry with this request id already exists.
    ///
    /// This is a hard error: the table never silently overwrites a
    /// live entry.
    #[error("duplicate request id {id}")]
    DuplicateRequestId {
        /// The colliding id.
        id: i32,
    },

    /// The token bucket rejected the request.
    #[error("rate limited")]
    RateLimited,

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The session was permanently closed while the request was pending.
    #[error("client closed")]
    ClientClosed,

    /// The underlying send failed before the request was on the wire.
    #[error("send failed: {0}")]
    Send(#[from] SendError),

    /// The server answered with a non-zero response status.
    #[error("rejected by server (status {status}): {message}")]
    Rejected {
        /// Server-provided status code.
        status: i32,
        /// Server-provided error text, possibly empty.
        message: String,
    },
}

impl RequestError {
    /// Check whether this outcome is an expected, recoverable one the
    /// caller should anticipate in normal operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RequestError::Timeout
                | RequestError::RateLimited
                | RequestError::RouteBusy { .. }
                | RequestError::Send(SendError::QueueFull)
        )
    }
}

/// Wire-level protocol violations.
///
/// Every variant is fatal for the current connection: the channel is
/// torn down and, if policy allows, the reconnect supervisor takes over.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame carried a non-positive length field.
    #[error("invalid frame length {length}")]
    BadLength {
        /// The offending length value, as read off the wire.
        length: i32,
    },

    /// A frame length exceeded the hard cap.
    #[error("frame of {length} bytes exceeds cap of {cap}")]
    FrameTooLarge {
        /// The declared frame length.
        length: usize,
        /// The configured cap.
        cap: usize,
    },

    /// The envelope payload could not be decoded.
    #[error("envelope decode failed: {0}")]
    Codec(#[from] CodecError),
}

/// Errors produced by an envelope codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the envelope was complete.
    #[error("unexpected end of envelope data")]
    UnexpectedEof,

    /// Unknown message kind byte.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// A length-prefixed field declared more bytes than remain.
    #[error("field length {declared} exceeds remaining {remaining} bytes")]
    FieldOverrun {
        /// Declared field length.
        declared: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// Error text was not valid UTF-8.
    #[error("error text is not valid utf-8")]
    BadErrorText,
}

/// Result alias for connect operations.
pub type ConnectResult<T> = Result<T, ConnectError>;

/// Result alias for send operations.
pub type SendResult<T> = Result<T, SendError>;

/// Result alias for correlated requests.
pub type RequestResult<T> = Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_send_errors() {
        assert!(SendError::QueueFull.is_transient());
        assert!(SendError::NotConnected.is_transient());

        assert!(!SendError::InvalidData.is_transient());
        assert!(!SendError::ChannelClosed.is_transient());
        assert!(
            !SendError::DataTooLarge {
                size: 10,
                limit: 5
            }
            .is_transient()
        );
    }

    #[test]
    fn test_recoverable_request_errors() {
        assert!(RequestError::Timeout.is_recoverable());
        assert!(RequestError::RateLimited.is_recoverable());
        assert!(RequestError::RouteBusy { route: 0x0001_0002 }.is_recoverable());

        assert!(!RequestError::ClientClosed.is_recoverable());
        assert!(!RequestError::DuplicateRequestId { id: 7 }.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = RequestError::RouteBusy { route: 0x0001_0002 };
        assert_eq!(
            err.to_string(),
            "request already in flight for route 0x00010002"
        );

        let err = ProtocolError::BadLength { length: -1 };
        assert_eq!(err.to_string(), "invalid frame length -1");
    }
}
