//! Session state machine
//!
//! State transitions:
//! ```text
//! DISCONNECTED → CONNECTING → AWAITING_AUTH → AUTHENTICATED
//!       ↑             ↓             ↓               ↓
//!       └─────────────┴─────────────┴───────────────┘
//!                    (any failure / disconnect)
//! ```
//!
//! Both roles walk the same path. The connecting side enters `Connecting`
//! when it dials out; the accepting side enters it when a transport is
//! accepted. `AwaitingAuth` covers the handshake exchange.

use crate::error::{ProtocolError, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No live transport
    #[default]
    Disconnected,

    /// Transport being established
    Connecting,

    /// Transport established, handshake not yet completed
    AwaitingAuth,

    /// Handshake accepted, application traffic flows
    Authenticated,
}

impl SessionState {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, AwaitingAuth) => true,
            (AwaitingAuth, Authenticated) => true,

            // any failure tears the session down
            (_, Disconnected) => true,

            (a, b) if *a == b => true,

            _ => false,
        }
    }

    /// Attempts to transition to a new state
    ///
    /// Returns Ok(()) if transition is valid, Err otherwise
    pub fn transition_to(&mut self, next: SessionState) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, SessionState::Disconnected)
    }

    #[inline]
    pub fn is_awaiting_auth(&self) -> bool {
        matches!(self, SessionState::AwaitingAuth)
    }

    /// True while a transport is held, whether or not the handshake finished
    #[inline]
    pub fn has_transport(&self) -> bool {
        matches!(self, SessionState::AwaitingAuth | SessionState::Authenticated)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::AwaitingAuth => write!(f, "AwaitingAuth"),
            SessionState::Authenticated => write!(f, "Authenticated"),
        }
    }
}
