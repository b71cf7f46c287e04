//! Message model for the nodelink protocol
//!
//! Every message on the wire is a single JSON object. The protocol defines no
//! payload schema; it only interprets a small set of reserved fields:
//! - `password`: handshake (client → server, first message)
//! - `authenticated` / `error`: handshake outcome (server → client)
//! - `requestId` / `responseId`: request correlation (either direction)
//! - `ping` / `pong`: keepalive probe and acknowledgment

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Reserved field names
pub mod fields {
    /// Shared secret sent by the connecting side
    pub const PASSWORD: &str = "password";

    /// `true` when the handshake was accepted, `false` on rejection
    pub const AUTHENTICATED: &str = "authenticated";

    /// Human-readable rejection reason
    pub const ERROR: &str = "error";

    /// Marks a message as a request
    pub const REQUEST_ID: &str = "requestId";

    /// Marks a message as the answer to a prior request
    pub const RESPONSE_ID: &str = "responseId";

    /// Keepalive probe token
    pub const PING: &str = "ping";

    /// Keepalive acknowledgment, echoes the probe token
    pub const PONG: &str = "pong";
}

/// Rejection reason sent when the shared secret does not match
pub const INCORRECT_PASSWORD: &str = "incorrect password";

/// Application payload: an open JSON object
pub type Payload = Map<String, Value>;

/// Correlation identifier carried in `requestId` / `responseId`
pub type RequestId = u64;

/// A decoded wire message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Payload);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an application value, which must be a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn from_payload(payload: Payload) -> Self {
        Self(payload)
    }

    /// Adds (or replaces) a field, builder style
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes a field and returns its value
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn payload(&self) -> &Payload {
        &self.0
    }

    pub fn into_payload(self) -> Payload {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        Self(payload)
    }
}

impl TryFrom<Value> for Message {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Handshake sent by the connecting side as its first and only message
/// until authenticated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub password: String,
}

/// Handshake outcome sent by the accepting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub authenticated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeReply {
    pub fn accepted() -> Self {
        Self {
            authenticated: true,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            error: Some(reason.into()),
        }
    }
}

/// `{ "password": secret }`
pub fn handshake(password: &str) -> Message {
    Message::new().with(fields::PASSWORD, password)
}

/// `{ "authenticated": true }`
pub fn accepted() -> Message {
    to_message(&HandshakeReply::accepted())
}

/// `{ "authenticated": false, "error": reason }`
pub fn rejected(reason: &str) -> Message {
    to_message(&HandshakeReply::rejected(reason))
}

/// `{ "ping": token }`
pub fn probe(token: &str) -> Message {
    Message::new().with(fields::PING, token)
}

/// `{ "pong": token }`
pub fn acknowledgment(token: &str) -> Message {
    Message::new().with(fields::PONG, token)
}

fn to_message<T: Serialize>(value: &T) -> Message {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Message(map),
        _ => Message::new(),
    }
}
