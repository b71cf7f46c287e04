//! Newline-delimited JSON over any byte stream
//!
//! Used for TCP and TLS connections on both sides of the protocol.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nodelink_protocol::{JsonLineCodec, Message, ProtocolError, Transport};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

/// Bridges a stream of JSON lines to message channels
pub struct LineTransport<S> {
    stream: S,
    codec: JsonLineCodec,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        Self::with_codec(stream, JsonLineCodec::new())
    }

    pub fn with_codec(stream: S, codec: JsonLineCodec) -> Self {
        Self { stream, codec }
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Error = ProtocolError;

    async fn run(
        self,
        incoming_tx: mpsc::Sender<Message>,
        mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    ) -> Result<(), Self::Error> {
        let (reader, writer) = tokio::io::split(self.stream);
        let mut lines_in = FramedRead::new(reader, self.codec.clone());
        let mut lines_out = FramedWrite::new(writer, self.codec);

        loop {
            tokio::select! {
                frame = lines_in.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            if incoming_tx.send(message).await.is_err() {
                                tracing::debug!("Session dropped, stopping transport");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Stream read failed");
                            return Err(e);
                        }
                        None => {
                            tracing::debug!("Peer closed the stream");
                            break;
                        }
                    }
                }

                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(message) => lines_out.send(message).await?,
                        None => {
                            // flushes what is buffered, then shuts down the write half
                            lines_out.close().await?;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
