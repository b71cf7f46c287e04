//! # nodelink protocol
//!
//! Core protocol definitions shared by the nodelink client and server.
//!
//! This crate provides:
//! - `Message`: the open JSON object exchanged on the wire, plus the reserved
//!   control fields and constructors for every control message
//! - `JsonLineCodec`: newline-delimited JSON framing
//! - `SessionState`: the per-session state machine
//! - `AuthProvider` / `SharedSecretAuth`: the handshake check
//! - `route`: classification of decoded messages
//! - `RequestTable`: request/response correlation with timeouts
//! - `Transport` / `Link`: the boundary to the byte stream
//!
//! ## Example
//!
//! ```
//! use nodelink_protocol::{route, Message, Role, Route, SessionState};
//! use serde_json::json;
//!
//! let message = Message::from_value(json!({"requestId": 1, "foo": "bar"})).unwrap();
//!
//! match route(message, Role::Server, SessionState::Authenticated) {
//!     Route::Request { request_id, payload } => {
//!         assert_eq!(request_id, 1);
//!         assert_eq!(payload.get("foo").unwrap(), "bar");
//!     }
//!     other => panic!("unexpected route: {:?}", other),
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod messages;
pub mod responder;
pub mod router;
pub mod state;
pub mod timer;
pub mod transport;

pub use auth::{AuthProvider, AuthResult, SharedSecretAuth};
pub use codec::JsonLineCodec;
pub use config::{ClientConfig, ServerConfig};
pub use correlation::{completion, Completion, PendingResponse, RequestTable};
pub use error::{ProtocolError, RequestError, Result, SessionError};
pub use messages::{fields, Message, Payload, RequestId};
pub use responder::{IncomingRequest, Responder};
pub use router::{route, Role, Route};
pub use state::SessionState;
pub use transport::{Link, Transport};
