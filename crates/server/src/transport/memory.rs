//! In-memory listener for tests and embedded use
//!
//! Pairs with the client crate's `MemoryConnector`.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use nodelink_client::transport::memory::{
    MemoryConnector, MemoryTransport, MemoryTransportError,
};

use super::Listener;

#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::Receiver<MemoryTransport>,
}

impl MemoryListener {
    /// Creates a listener and a connector that dials it
    ///
    /// # Example
    ///
    /// ```
    /// use nodelink_server::transport::MemoryListener;
    ///
    /// let (listener, connector) = MemoryListener::new(100);
    /// ```
    pub fn new(buffer_size: usize) -> (Self, MemoryConnector) {
        let (connector, accept_rx) = MemoryConnector::new(buffer_size);
        (Self { accept_rx }, connector)
    }
}

#[async_trait]
impl Listener for MemoryListener {
    type Transport = MemoryTransport;

    async fn accept(&mut self) -> std::io::Result<Self::Transport> {
        match self.accept_rx.recv().await {
            Some(transport) => Ok(transport),
            // every connector is gone; no connection can arrive anymore
            None => std::future::pending().await,
        }
    }
}
