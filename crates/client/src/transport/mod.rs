//! Connecting-side transports
//!
//! A [`Connector`] establishes one fresh byte stream per connection attempt
//! and wraps it in a [`Transport`]. The client session never reuses a
//! transport: every reconnect asks the connector again.

pub mod line;
pub mod memory;
pub mod tcp;
pub mod tls;

use async_trait::async_trait;

// Re-export the Transport trait from protocol
pub use nodelink_protocol::Transport;

pub use line::LineTransport;
pub use memory::{MemoryConnector, MemoryTransport};
pub use tcp::TcpConnector;
pub use tls::TlsConnector;

/// Dials the accepting side
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Establishes a new connection
    ///
    /// Errors are connection failures (refused, unreachable, TLS handshake)
    /// and are retried by the client's reconnection scheduler.
    async fn connect(&self) -> std::io::Result<Self::Transport>;
}
