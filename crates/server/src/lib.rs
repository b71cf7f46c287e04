//! # nodelink server
//!
//! Accepting role of the nodelink protocol. Every accepted connection becomes
//! a session with its own task: the first message must carry the shared
//! secret, after which messages and requests flow both ways and a keepalive
//! monitor watches the connection.
//!
//! ## Example
//!
//! ```no_run
//! use nodelink_protocol::ServerConfig;
//! use nodelink_server::transport::TcpListener;
//! use nodelink_server::{Server, ServerEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8000").await?;
//!     let (server, mut events) = Server::bind(ServerConfig::new("secret"), listener);
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ServerEvent::Authenticated(id) => {
//!                 let _ = server.send(id, json!({"welcome": true}));
//!             }
//!             ServerEvent::Request(_, request) => {
//!                 let _ = request.responder.send(json!({}));
//!             }
//!             other => println!("event: {:?}", other),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod connection;
pub mod keepalive;
mod registry;
pub mod transport;

use std::fmt;
use std::sync::Arc;

use nodelink_protocol::{
    completion, AuthProvider, IncomingRequest, Link, Message, Payload, ProtocolError,
    RequestError, ServerConfig, SessionError, SessionState, SharedSecretAuth,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::connection::{Command, Connection};
use crate::registry::{Registry, SessionHandle};
use crate::transport::Listener;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Identifies one accepted connection
///
/// Assigned in accept order, starting at 0. Never reused within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events raised by the server and its sessions
#[derive(Debug)]
pub enum ServerEvent {
    /// The session presented the correct secret
    Authenticated(SessionId),

    /// Plain message from a client, delivered verbatim
    Message(SessionId, Payload),

    /// Request from a client; answer through its responder
    Request(SessionId, IncomingRequest),

    /// The session's connection closed; its id is no longer valid
    Close(SessionId),

    /// Failure on one session, or on the listener when the id is `None`
    Error(Option<SessionId>, SessionError),

    /// The session missed a keepalive deadline and is being destroyed
    Timeout(SessionId),
}

struct ServerInner {
    registry: Registry,
    events: mpsc::UnboundedSender<ServerEvent>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Handle to a running server
///
/// Cheap to clone. Dropping the last handle stops accepting connections;
/// use [`Server::close`] to also destroy the live sessions.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Starts accepting on `listener`, checking handshakes against `config.password`
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind<L: Listener>(
        config: ServerConfig,
        listener: L,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let auth = Arc::new(SharedSecretAuth::new(config.password.clone()));
        Self::bind_with_auth(config, listener, auth)
    }

    /// Starts accepting on `listener` with a custom authentication provider
    pub fn bind_with_auth<L: Listener>(
        config: ServerConfig,
        listener: L,
        auth: Arc<dyn AuthProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Registry::default();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::new(config),
            auth,
            registry.clone(),
            events_tx.clone(),
        ));

        let inner = ServerInner {
            registry,
            events: events_tx,
            accept_task: Mutex::new(Some(accept_task)),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Sends a one-way message to session `id`
    ///
    /// Returns an error only for a non-object payload. An unknown, closed or
    /// unauthenticated session raises an `Error(Some(id), NotConnected)` event.
    pub fn send(&self, id: SessionId, payload: Value) -> Result<(), ServerError> {
        let message = Message::from_value(payload)?;

        let delivered = self
            .inner
            .registry
            .commands(id)
            .map(|commands| commands.send(Command::Send(message)).is_ok())
            .unwrap_or(false);

        if !delivered {
            tracing::warn!(session = %id, "Send to unknown session");
            let _ = self
                .inner
                .events
                .send(ServerEvent::Error(Some(id), SessionError::NotConnected));
        }
        Ok(())
    }

    /// Sends a request to session `id` and waits for the first response
    pub async fn request(&self, id: SessionId, payload: Value) -> Result<Payload, RequestError> {
        let payload = Message::from_value(payload)
            .map_err(|e| RequestError::InvalidPayload(e.to_string()))?
            .into_payload();

        let commands = self
            .inner
            .registry
            .commands(id)
            .ok_or(RequestError::NotConnected)?;

        let (done, response) = completion();
        commands
            .send(Command::Request(payload, done))
            .map_err(|_| RequestError::NotConnected)?;

        response.await
    }

    /// Ids of the live sessions, authenticated or not
    pub fn sessions(&self) -> Vec<SessionId> {
        self.inner.registry.ids()
    }

    pub fn state(&self, id: SessionId) -> SessionState {
        self.inner.registry.state(id).unwrap_or_default()
    }

    pub fn is_authenticated(&self, id: SessionId) -> bool {
        self.state(id).is_authenticated()
    }

    /// Stops accepting and destroys every live session
    ///
    /// Returns once the listener is released and every session has emitted
    /// `Close`.
    pub async fn close(&self) {
        let accept_task = self.inner.accept_task.lock().take();
        if let Some(task) = accept_task {
            task.abort();
            let _ = task.await;
            tracing::info!("Stopped accepting connections");
        }

        let sessions = self.inner.registry.drain();
        for (_, session) in &sessions {
            let _ = session.commands.send(Command::Destroy);
        }
        for (id, session) in sessions {
            if let Err(e) = session.task.await {
                tracing::error!(session = %id, error = %e, "Session task failed");
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("sessions", &self.sessions())
            .finish_non_exhaustive()
    }
}

async fn accept_loop<L: Listener>(
    mut listener: L,
    config: Arc<ServerConfig>,
    auth: Arc<dyn AuthProvider>,
    registry: Registry,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut next_id = 0u64;

    loop {
        let transport = match listener.accept().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                let error = SessionError::Transport(e.to_string());
                let _ = events.send(ServerEvent::Error(None, error));
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let id = SessionId(next_id);
        next_id += 1;
        tracing::info!(session = %id, "New connection");

        registry.insert_with(id, || {
            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
            let link = Link::spawn(transport, config.channel_capacity);

            let connection = Connection::new(
                id,
                Arc::clone(&config),
                Arc::clone(&auth),
                link,
                state_tx,
                commands_rx,
                events.clone(),
                registry.clone(),
            );

            SessionHandle {
                commands: commands_tx,
                state: state_rx,
                task: tokio::spawn(connection.run()),
            }
        });
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryListener;
    use nodelink_protocol::{messages, route, Role, Route};
    use serde_json::json;
    use tokio::time::timeout;

    fn config() -> ServerConfig {
        ServerConfig {
            password: "secret".to_string(),
            request_timeout_ms: 300,
            keepalive_interval_ms: 0,
            ..ServerConfig::default()
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn recv(link: &mut Link) -> Option<Message> {
        timeout(Duration::from_secs(2), link.recv())
            .await
            .expect("timed out waiting for message")
    }

    /// Connects a raw client link and completes the handshake
    async fn connect(
        connector: &transport::memory::MemoryConnector,
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    ) -> (SessionId, Link) {
        use nodelink_client::transport::Connector;

        let mut link = Link::spawn(connector.connect().await.unwrap(), 10);
        link.send(messages::handshake("secret")).unwrap();
        assert_eq!(recv(&mut link).await.unwrap(), messages::accepted());

        match next_event(events).await {
            ServerEvent::Authenticated(id) => (id, link),
            other => panic!("Expected authenticated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticates_and_assigns_ids() {
        let (listener, connector) = MemoryListener::new(4);
        let (server, mut events) = Server::bind(config(), listener);

        let (first, _a) = connect(&connector, &mut events).await;
        let (second, _b) = connect(&connector, &mut events).await;

        assert_eq!(first, SessionId(0));
        assert_eq!(second, SessionId(1));
        assert!(server.is_authenticated(first));
        assert_eq!(server.sessions(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected_and_closed() {
        use nodelink_client::transport::Connector;

        let (listener, connector) = MemoryListener::new(4);
        let (server, mut events) = Server::bind(config(), listener);

        let mut link = Link::spawn(connector.connect().await.unwrap(), 10);
        link.send(messages::handshake("wrong")).unwrap();

        assert_eq!(
            recv(&mut link).await.unwrap().into_value(),
            json!({"authenticated": false, "error": "incorrect password"})
        );
        assert!(recv(&mut link).await.is_none());

        match next_event(&mut events).await {
            ServerEvent::Close(id) => assert!(!server.is_authenticated(id)),
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(server.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_message_and_request_from_client() {
        let (listener, connector) = MemoryListener::new(4);
        let (_server, mut events) = Server::bind(config(), listener);
        let (id, mut link) = connect(&connector, &mut events).await;

        link.send(Message::new().with("foo", "bar")).unwrap();
        match next_event(&mut events).await {
            ServerEvent::Message(from, payload) => {
                assert_eq!(from, id);
                assert_eq!(Value::Object(payload), json!({"foo": "bar"}));
            }
            other => panic!("Expected message, got {:?}", other),
        }

        link.send(Message::new().with("foo", "bar").with("requestId", 7)).unwrap();
        match next_event(&mut events).await {
            ServerEvent::Request(from, request) => {
                assert_eq!(from, id);
                assert_eq!(request.request_id(), 7);
                assert_eq!(request.body(), json!({"foo": "bar"}));
                request.responder.send(json!({"bar": "qux"})).unwrap();
            }
            other => panic!("Expected request, got {:?}", other),
        }

        assert_eq!(
            recv(&mut link).await.unwrap().into_value(),
            json!({"bar": "qux", "responseId": 7})
        );
    }

    #[tokio::test]
    async fn test_request_to_client() {
        let (listener, connector) = MemoryListener::new(4);
        let (server, mut events) = Server::bind(config(), listener);
        let (id, mut link) = connect(&connector, &mut events).await;

        let pending = tokio::spawn({
            let server = server.clone();
            async move { server.request(id, json!({"foo": "bar"})).await }
        });

        let message = recv(&mut link).await.unwrap();
        let request_id = match route(message, Role::Client, SessionState::Authenticated) {
            Route::Request { request_id, .. } => request_id,
            other => panic!("Expected request, got {:?}", other),
        };
        link.send(Message::new().with("bar", "qux").with("responseId", request_id))
            .unwrap();
        link.send(Message::new().with("bar", "qux2").with("responseId", request_id))
            .unwrap();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(Value::Object(response), json!({"bar": "qux"}));
    }

    #[tokio::test]
    async fn test_request_to_unknown_session() {
        let (listener, _connector) = MemoryListener::new(4);
        let (server, _events) = Server::bind(config(), listener);

        let result = server.request(SessionId(42), json!({})).await;
        assert_eq!(result, Err(RequestError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_to_unknown_session_raises_error() {
        let (listener, _connector) = MemoryListener::new(4);
        let (server, mut events) = Server::bind(config(), listener);

        server.send(SessionId(3), json!({"foo": "bar"})).unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            ServerEvent::Error(Some(SessionId(3)), SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_keepalive_timeout_destroys_session() {
        let (listener, connector) = MemoryListener::new(4);
        let config = ServerConfig {
            keepalive_interval_ms: 50,
            keepalive_timeout_ms: 50,
            ..config()
        };
        let (server, mut events) = Server::bind(config, listener);
        let (id, mut link) = connect(&connector, &mut events).await;

        // read the probe but never answer it
        let probe = recv(&mut link).await.unwrap();
        assert!(probe.contains("ping"));

        assert!(matches!(next_event(&mut events).await, ServerEvent::Timeout(t) if t == id));
        assert!(matches!(next_event(&mut events).await, ServerEvent::Close(c) if c == id));
        assert!(recv(&mut link).await.is_none());
        assert!(!server.is_authenticated(id));
    }

    #[tokio::test]
    async fn test_silent_connection_is_dropped_before_auth() {
        use nodelink_client::transport::Connector;

        let (listener, connector) = MemoryListener::new(4);
        let config = ServerConfig {
            keepalive_timeout_ms: 50,
            ..config()
        };
        let (server, mut events) = Server::bind(config, listener);

        // never send the handshake
        let mut link = Link::spawn(connector.connect().await.unwrap(), 10);

        assert!(matches!(next_event(&mut events).await, ServerEvent::Close(_)));
        assert!(recv(&mut link).await.is_none());
        assert!(server.sessions().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_answered_keepalive_keeps_session() {
        let (listener, connector) = MemoryListener::new(4);
        let config = ServerConfig {
            keepalive_interval_ms: 30,
            keepalive_timeout_ms: 100,
            ..config()
        };
        let (server, mut events) = Server::bind(config, listener);
        let (id, mut link) = connect(&connector, &mut events).await;

        for _ in 0..5 {
            let probe = recv(&mut link).await.unwrap();
            let token = probe.get("ping").and_then(Value::as_str).unwrap().to_string();
            link.send(messages::acknowledgment(&token)).unwrap();
        }

        assert!(server.is_authenticated(id));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_destroys_sessions() {
        let (listener, connector) = MemoryListener::new(4);
        let (server, mut events) = Server::bind(config(), listener);
        let (id, mut link) = connect(&connector, &mut events).await;

        let pending = tokio::spawn({
            let server = server.clone();
            async move { server.request(id, json!({"foo": "bar"})).await }
        });
        recv(&mut link).await.unwrap();

        server.close().await;

        assert_eq!(pending.await.unwrap(), Err(RequestError::ConnectionLost));
        assert!(matches!(next_event(&mut events).await, ServerEvent::Close(c) if c == id));
        assert!(recv(&mut link).await.is_none());
        assert!(server.sessions().is_empty());
    }
}
