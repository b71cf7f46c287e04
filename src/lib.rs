//! # nodelink
//!
//! Authenticated, bidirectional request/response messaging between a client
//! and a server over one persistent stream:
//! - Shared-secret handshake before any application traffic
//! - One-way messages and correlated requests in both directions
//! - Request timeouts and cancellation on connection loss
//! - Automatic client reconnection and server-side keepalive
//!
//! ## Components
//!
//! - `nodelink-protocol`: message model, framing, routing and request correlation
//! - `nodelink-server`: accepting role, one session task per connection
//! - `nodelink-client`: connecting role with reconnection
//!
//! ## Example
//!
//! ```no_run
//! use nodelink::client::transport::TcpConnector;
//! use nodelink::server::transport::TcpListener;
//! use nodelink::{Client, ClientConfig, Server, ServerConfig};
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:8000").await?;
//! let (_server, _server_events) = Server::bind(ServerConfig::new("secret"), listener);
//!
//! let connector = TcpConnector::new("127.0.0.1:8000");
//! let (_client, _client_events) = Client::spawn(ClientConfig::new("secret"), connector);
//! # Ok(())
//! # }
//! ```

pub use nodelink_client as client;
pub use nodelink_protocol as protocol;
pub use nodelink_server as server;

pub use nodelink_client::{Client, ClientError, ClientEvent};
pub use nodelink_protocol::{
    ClientConfig, IncomingRequest, Payload, RequestError, Responder, ServerConfig, SessionError,
    SessionState,
};
pub use nodelink_server::{Server, ServerError, ServerEvent, SessionId};
