use std::net::SocketAddr;

use async_trait::async_trait;
use nodelink_client::transport::LineTransport;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::Listener;

/// Plain TCP listener
#[derive(Debug)]
pub struct TcpListener {
    inner: tokio::net::TcpListener,
}

impl TcpListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn from_tokio(inner: tokio::net::TcpListener) -> Self {
        Self { inner }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Transport = LineTransport<TcpStream>;

    async fn accept(&mut self) -> std::io::Result<Self::Transport> {
        let (stream, peer_addr) = self.inner.accept().await?;
        tracing::debug!(peer = %peer_addr, "Accepted TCP connection");
        stream.set_nodelay(true)?;
        Ok(LineTransport::new(stream))
    }
}
