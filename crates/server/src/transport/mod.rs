//! Accepting-side transports
//!
//! A [`Listener`] yields one transport per accepted connection. Framing is
//! shared with the client crate.

pub mod memory;
pub mod tcp;
pub mod tls;

use async_trait::async_trait;

// Re-export the Transport trait from protocol
pub use nodelink_protocol::Transport;

pub use memory::MemoryListener;
pub use nodelink_client::transport::LineTransport;
pub use tcp::TcpListener;
pub use tls::{TlsListener, TlsServerTransport};

/// Source of inbound connections
#[async_trait]
pub trait Listener: Send + 'static {
    type Transport: Transport;

    /// Waits for the next connection
    ///
    /// An error concerns a single failed accept; the accept loop keeps going.
    async fn accept(&mut self) -> std::io::Result<Self::Transport>;
}
