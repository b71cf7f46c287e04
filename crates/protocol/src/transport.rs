//! Transport layer abstraction for nodelink
//!
//! A transport owns one established byte stream (TLS, TCP, in-memory, ...)
//! and bridges it to message channels. The session tasks never touch the
//! stream directly; they only see decoded `Message`s through a [`Link`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProtocolError, Result};
use crate::messages::{Message, RequestId};
use crate::responder::Responder;

/// Transport layer abstraction for one established connection
///
/// # Example: Implementing a custom transport
///
/// ```no_run
/// use async_trait::async_trait;
/// use nodelink_protocol::transport::Transport;
/// use nodelink_protocol::Message;
/// use tokio::sync::mpsc;
///
/// struct LoopbackTransport;
///
/// #[async_trait]
/// impl Transport for LoopbackTransport {
///     type Error = std::io::Error;
///
///     async fn run(
///         self,
///         incoming_tx: mpsc::Sender<Message>,
///         mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
///     ) -> Result<(), Self::Error> {
///         while let Some(message) = outgoing_rx.recv().await {
///             if incoming_tx.send(message).await.is_err() {
///                 break;
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + 'static {
    /// Error type for this transport
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the transport until the connection ends
    ///
    /// - Decoded messages from the peer go to `incoming_tx`, in stream order.
    /// - Messages from `outgoing_rx` are encoded and written to the peer.
    /// - When `outgoing_rx` is closed, queued output is flushed, the stream
    ///   is shut down, and the method returns `Ok(())`.
    /// - When the peer closes the stream, the method returns `Ok(())`.
    ///
    /// Returning drops `incoming_tx`, which is how the session learns the
    /// connection is gone.
    async fn run(
        self,
        incoming_tx: mpsc::Sender<Message>,
        outgoing_rx: mpsc::UnboundedReceiver<Message>,
    ) -> std::result::Result<(), Self::Error>;
}

/// A running transport as seen by a session
///
/// Owns the single live transport task of a session. Dropping or aborting
/// the link destroys the connection; it is never reused.
#[derive(Debug)]
pub struct Link {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    incoming: mpsc::Receiver<Message>,
    task: JoinHandle<std::result::Result<(), String>>,
}

impl Link {
    /// Spawns `transport` on the current runtime
    pub fn spawn<T: Transport>(transport: T, capacity: usize) -> Self {
        let (incoming_tx, incoming) = mpsc::channel(capacity.max(1));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            transport
                .run(incoming_tx, outgoing_rx)
                .await
                .map_err(|e| e.to_string())
        });

        Self {
            outgoing: Some(outgoing),
            incoming,
            task,
        }
    }

    /// Queues a message for the peer
    pub fn send(&self, message: Message) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or(ProtocolError::LinkClosed)?
            .send(message)
            .map_err(|_| ProtocolError::LinkClosed)
    }

    /// Next message from the peer; `None` once the transport has stopped
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Response handle for an inbound request on this link
    pub fn responder(&self, request_id: RequestId) -> Responder {
        let outgoing = match &self.outgoing {
            Some(tx) => tx.downgrade(),
            // already closing; hand out a handle that always fails
            None => mpsc::unbounded_channel::<Message>().0.downgrade(),
        };
        Responder::new(request_id, outgoing)
    }

    /// Stops accepting output; the transport flushes what is queued and
    /// shuts the stream down
    pub fn close(&mut self) {
        self.outgoing = None;
    }

    /// Destroys the transport immediately, discarding queued output
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_closing(&self) -> bool {
        self.outgoing.is_none()
    }

    /// Waits for the transport task and returns its failure, if any
    ///
    /// A deliberately aborted transport is not a failure. Call at most once.
    pub async fn finish(&mut self) -> Option<String> {
        self.outgoing = None;
        match (&mut self.task).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(join_error) if join_error.is_cancelled() => None,
            Err(join_error) => Some(join_error.to_string()),
        }
    }
}
