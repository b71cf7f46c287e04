use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Connector, LineTransport};

/// Plain TCP connector
///
/// Intended for trusted networks and tests; use [`super::TlsConnector`]
/// anywhere else.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = LineTransport<TcpStream>;

    async fn connect(&self) -> std::io::Result<Self::Transport> {
        tracing::debug!(addr = %self.addr, "Connecting over TCP");
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(LineTransport::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string());
        assert!(connector.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connector = TcpConnector::new(listener.local_addr().unwrap().to_string());

        let (connected, accepted) = tokio::join!(connector.connect(), listener.accept());
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }
}
