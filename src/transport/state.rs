//! Connection lifecycle state machine.
//!
//! The machine is the single authoritative record of the session
//! lifecycle. Every transition is serialized under one mutex and the
//! state-changed notification is published while that lock is still
//! held, so observers always see monotonically ordered changes.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Connection established, traffic flowing.
    Connected,
    /// An unsolicited disconnect occurred; the reconnect supervisor is
    /// in charge.
    Reconnecting,
    /// Terminal. The session can never be used again.
    Closed,
}

impl ConnectionState {
    /// Short name for log output and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// The legal transition table.
    fn allows(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match self {
            Disconnected => matches!(to, Connecting | Closed),
            Connecting => matches!(to, Connected | Disconnected | Closed),
            Connected => matches!(to, Disconnected | Reconnecting | Closed),
            Reconnecting => matches!(to, Connecting | Disconnected | Closed),
            Closed => false,
        }
    }
}

/// A rejected transition.
///
/// Callers must treat this as "try again later", not as fatal: the
/// machine did not move and another racer simply got there first.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// State the machine was in.
    pub from: ConnectionState,
    /// State that was requested.
    pub to: ConnectionState,
}

/// Serialized, observable connection state.
#[derive(Debug)]
pub struct StateMachine {
    current: Mutex<ConnectionState>,
    notify: watch::Sender<ConnectionState>,
}

impl StateMachine {
    /// Create a machine in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (notify, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            current: Mutex::new(ConnectionState::Disconnected),
            notify,
        }
    }

    /// The current state.
    pub fn current(&self) -> ConnectionState {
        *self.lock()
    }

    /// Attempt a transition.
    ///
    /// A same-state transition is a no-op success. An illegal one is
    /// rejected without mutating anything, and logged at warn level.
    pub fn transition(&self, to: ConnectionState) -> Result<(), IllegalTransition> {
        let mut current = self.lock();
        let from = *current;
        if from == to {
            return Ok(());
        }
        if !from.allows(to) {
            warn!(from = from.name(), to = to.name(), "illegal state transition rejected");
            return Err(IllegalTransition { from, to });
        }
        *current = to;
        // Published under the lock: observers see ordered changes.
        self.notify.send_replace(to);
        Ok(())
    }

    /// Force a transition, bypassing the legality check.
    ///
    /// Reserved for initialization and error-recovery paths. Still
    /// serialized and still notified like a normal transition.
    pub fn force_transition(&self, to: ConnectionState) {
        let mut current = self.lock();
        if *current == to {
            return;
        }
        *current = to;
        self.notify.send_replace(to);
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.notify.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
