use serde_json::Value;
use thiserror::Error;

use crate::state::SessionState;

/// Protocol-level failures: codec problems, malformed payloads, closed links.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Link closed")]
    LinkClosed,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err.to_string())
    }
}

/// Failure delivered to the caller of a single `request`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// The session was not authenticated (or no longer exists) when the request was made.
    #[error("not connected")]
    NotConnected,

    /// No response arrived within the configured window.
    #[error("request timeout")]
    TimedOut { request: Value },

    /// The transport closed while the request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    #[error("invalid request payload: {0}")]
    InvalidPayload(String),
}

/// Session-wide failures surfaced through `error` events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
