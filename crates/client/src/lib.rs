//! # nodelink client
//!
//! Connecting role of the nodelink protocol: dials the server, presents the
//! shared secret, reconnects after outages, and exchanges messages and
//! requests once authenticated.
//!
//! ## Example
//!
//! ```no_run
//! use nodelink_client::transport::TcpConnector;
//! use nodelink_client::{Client, ClientEvent};
//! use nodelink_protocol::ClientConfig;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = TcpConnector::new("127.0.0.1:8000");
//!     let (client, mut events) = Client::spawn(ClientConfig::new("secret"), connector);
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Authenticated => {
//!                 let response = client.request(json!({"foo": "bar"})).await;
//!                 println!("response: {:?}", response);
//!             }
//!             ClientEvent::Request(request) => {
//!                 let _ = request.responder.send(json!({}));
//!             }
//!             other => println!("event: {:?}", other),
//!         }
//!     }
//! }
//! ```

pub mod reconnect;
mod session;
pub mod transport;

use nodelink_protocol::{
    completion, ClientConfig, IncomingRequest, Message, Payload, ProtocolError, RequestError,
    SessionError, SessionState,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::session::{ClientSession, Command};
use crate::transport::Connector;

/// Events raised by the client session
#[derive(Debug)]
pub enum ClientEvent {
    /// The server accepted the handshake
    Authenticated,

    /// Plain message from the server, delivered verbatim
    Message(Payload),

    /// Request from the server; answer through its responder
    Request(IncomingRequest),

    /// An established connection closed
    Close,

    /// Session-wide failure (connect, transport, rejected handshake, send while offline)
    Error(SessionError),

    /// The reconnect timer fired and a new connection attempt started
    ReconnectAttempt,
}

/// Handle to a running client session
///
/// Cheap to clone. The session task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl Client {
    /// Spawns the client session and starts connecting immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: Connector>(
        config: ClientConfig,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let session = ClientSession::new(config, connector, commands_rx, events_tx, state_tx);
        tokio::spawn(session.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        )
    }

    /// Sends a one-way message
    ///
    /// Returns an error only for a non-object payload or a stopped session.
    /// Sending while not authenticated raises an `Error(NotConnected)` event.
    pub fn send(&self, payload: Value) -> Result<(), ClientError> {
        let message = Message::from_value(payload)?;
        self.command(Command::Send(message))
    }

    /// Sends a request and waits for the server's first response
    pub async fn request(&self, payload: Value) -> Result<Payload, RequestError> {
        let payload = Message::from_value(payload)
            .map_err(|e| RequestError::InvalidPayload(e.to_string()))?
            .into_payload();

        let (done, response) = completion();
        self.commands
            .send(Command::Request(payload, done))
            .map_err(|_| RequestError::NotConnected)?;

        response.await
    }

    /// Tears down the connection and disables reconnection
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    /// Re-enables reconnection and connects if currently disconnected
    pub fn connect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Waits until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::SessionClosed)
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Client session has stopped")]
    SessionClosed,

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}
