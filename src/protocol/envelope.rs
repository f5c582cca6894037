//! The envelope: the self-contained unit exchanged over the wire.

use crate::core::CodecError;

/// Message kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Liveness probe / probe acknowledgment.
    Heartbeat = 0x01,
    /// Application traffic (the only kind subject to rate limiting).
    Business = 0x02,
    /// Server clock sample for offset estimation.
    TimeSync = 0x03,
    /// Server-initiated disconnect notice.
    Disconnect = 0x04,
}

impl MessageKind {
    /// Parse a kind from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Heartbeat),
            0x02 => Some(Self::Business),
            0x03 => Some(Self::TimeSync),
            0x04 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Check whether this kind is exempt from the rate limiter.
    ///
    /// Only business traffic is gated; control messages must always be
    /// able to leave.
    pub fn is_rate_limit_exempt(self) -> bool {
        !matches!(self, MessageKind::Business)
    }
}

/// An application dispatch key, packed as a major/minor pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route(u32);

impl Route {
    /// Build a route from its major and minor halves.
    pub fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    /// Reconstruct a route from its packed form.
    pub fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    /// The packed `u32` form, `(major << 16) | minor`.
    pub fn packed(self) -> u32 {
        self.0
    }

    /// The major (high) half.
    pub fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The minor (low) half.
    pub fn minor(self) -> u16 {
        self.0 as u16
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// The unit exchanged over the wire.
///
/// Immutable once built; one envelope lives for exactly one trip across
/// the wire. A `request_id` of 0 marks a non-correlated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message kind.
    pub kind: MessageKind,
    /// Dispatch route.
    pub route: Route,
    /// Correlation id, 0 when uncorrelated.
    pub request_id: i32,
    /// Response status; 0 means success.
    pub status: i32,
    /// Server-provided error text, empty on success.
    pub error_text: String,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build a business envelope.
    pub fn business(route: Route, request_id: i32, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Business,
            route,
            request_id,
            status: 0,
            error_text: String::new(),
            payload,
        }
    }

    /// Build a heartbeat probe.
    pub fn heartbeat() -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            route: Route::from_packed(0),
            request_id: 0,
            status: 0,
            error_text: String::new(),
            payload: Vec::new(),
        }
    }

    /// Build a time-sync probe carrying the local clock sample.
    pub fn time_sync(local_millis: i64) -> Self {
        Self {
            kind: MessageKind::TimeSync,
            route: Route::from_packed(0),
            request_id: 0,
            status: 0,
            error_text: String::new(),
            payload: local_millis.to_be_bytes().to_vec(),
        }
    }

    /// Check whether this envelope expects a correlated response.
    pub fn is_correlated(&self) -> bool {
        self.request_id != 0
    }
}

/// Reason codes carried by a server-initiated disconnect notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DisconnectReason {
    /// Generic server-side close request; reconnect is allowed.
    Normal = 0,
    /// The same account logged in elsewhere.
    DuplicateLogin = 1,
    /// The account or address was banned.
    Banned = 2,
    /// The server is entering maintenance.
    Maintenance = 3,
    /// Authentication was rejected.
    AuthFailed = 4,
    /// The server is shutting this session down for good.
    ServerClosed = 5,
    /// The server is overloaded; clients may retry.
    Overloaded = 6,
    /// Reason code not recognized by this client version.
    Unknown = -1,
}

impl DisconnectReason {
    /// Parse a reason from its wire code; unrecognized codes map to
    /// [`DisconnectReason::Unknown`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Normal,
            1 => Self::DuplicateLogin,
            2 => Self::Banned,
            3 => Self::Maintenance,
            4 => Self::AuthFailed,
            5 => Self::ServerClosed,
            6 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// Policy table: may the client auto-reconnect after this reason?
    ///
    /// Duplicate login, ban, maintenance, auth failure, and a
    /// server-initiated close all force a hard close instead.
    pub fn allows_reconnect(self) -> bool {
        !matches!(
            self,
            Self::DuplicateLogin
                | Self::Banned
                | Self::Maintenance
                | Self::AuthFailed
                | Self::ServerClosed
        )
    }
}

/// A disconnect notice, reported on its own channel, separate from the
/// generic error surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    /// Why the connection ended.
    pub reason: DisconnectReason,
    /// Human-readable detail from the server, possibly empty.
    pub detail: String,
}

impl DisconnectNotice {
    /// Extract a notice from a disconnect envelope.
    ///
    /// The reason code travels in the envelope status field; the detail
    /// in the error text.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CodecError> {
        if envelope.kind != MessageKind::Disconnect {
            return Err(CodecError::UnknownKind(envelope.kind.as_byte()));
        }
        Ok(Self {
            reason: DisconnectReason::from_code(envelope.status),
            detail: envelope.error_text.clone(),
        })
    }
}
