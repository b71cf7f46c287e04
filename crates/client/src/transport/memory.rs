//! In-memory transport for tests and embedded use
//!
//! This transport uses Tokio channels instead of sockets, carrying decoded
//! messages directly. Both ends run in the same process, so there is no
//! framing and no encryption.

use async_trait::async_trait;
use nodelink_protocol::Message;
use tokio::sync::mpsc;

use super::{Connector, Transport};

/// One end of an in-memory connection
///
/// # Example
///
/// ```
/// use nodelink_client::transport::memory::MemoryTransport;
///
/// let (client_transport, server_transport) = MemoryTransport::create_pair(100);
/// ```
pub struct MemoryTransport {
    to_peer: mpsc::Sender<Message>,
    from_peer: mpsc::Receiver<Message>,
}

impl MemoryTransport {
    pub fn new(to_peer: mpsc::Sender<Message>, from_peer: mpsc::Receiver<Message>) -> Self {
        Self { to_peer, from_peer }
    }

    /// Creates a pair of connected transports for client and server
    pub fn create_pair(buffer_size: usize) -> (Self, Self) {
        let (client_to_server_tx, client_to_server_rx) = mpsc::channel(buffer_size);
        let (server_to_client_tx, server_to_client_rx) = mpsc::channel(buffer_size);

        let client_transport = Self::new(client_to_server_tx, server_to_client_rx);
        let server_transport = Self::new(server_to_client_tx, client_to_server_rx);

        (client_transport, server_transport)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = MemoryTransportError;

    async fn run(
        mut self,
        incoming_tx: mpsc::Sender<Message>,
        mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    ) -> Result<(), Self::Error> {
        loop {
            tokio::select! {
                // Receive from peer, forward to the session
                received = self.from_peer.recv() => {
                    match received {
                        Some(message) => {
                            if incoming_tx.send(message).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }

                // Receive from the session, send to peer
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if self.to_peer.send(message).await.is_err() {
                                return Err(MemoryTransportError::ChannelClosed);
                            }
                        }
                        // dropping `to_peer` on return signals end of stream
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

/// Memory transport errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryTransportError {
    #[error("Peer closed while sending")]
    ChannelClosed,
}

/// Connector handing the server half of each new pair to a listener
///
/// The accepting side is `nodelink_server::transport::MemoryListener`.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::Sender<MemoryTransport>,
    buffer_size: usize,
}

impl MemoryConnector {
    /// Creates a connector and the queue of server-side transports it feeds
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<MemoryTransport>) {
        let (accept_tx, accept_rx) = mpsc::channel(buffer_size.max(1));
        (
            Self {
                accept_tx,
                buffer_size: buffer_size.max(1),
            },
            accept_rx,
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self) -> std::io::Result<Self::Transport> {
        let (client_transport, server_transport) = MemoryTransport::create_pair(self.buffer_size);
        self.accept_tx.send(server_transport).await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "memory listener closed")
        })?;
        Ok(client_transport)
    }
}
