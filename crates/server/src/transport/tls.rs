//! TLS listener built on rustls
//!
//! The TLS handshake runs inside the connection's own transport task, so a
//! slow or hostile peer never stalls the accept loop.

use std::fs;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use nodelink_client::transport::LineTransport;
use nodelink_protocol::{Message, ProtocolError, Transport};
use rustls::ServerConfig;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use super::Listener;
use crate::ServerError;

/// Builds a rustls server configuration from PEM certificate chain and key
pub fn server_config_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ServerConfig>, ServerError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(ServerError::Tls("no certificate found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| ServerError::Tls(format!("invalid private key: {}", e)))?
        .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;

    Ok(Arc::new(config))
}

/// TLS over TCP listener
pub struct TlsListener {
    inner: tokio::net::TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: Arc<ServerConfig>,
    ) -> std::io::Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self::from_tokio(inner, config))
    }

    pub fn from_tokio(inner: tokio::net::TcpListener, config: Arc<ServerConfig>) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(config),
        }
    }

    /// Binds using certificate and key PEM files
    pub async fn bind_with_files(
        addr: impl ToSocketAddrs,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, ServerError> {
        let cert_pem = read_pem(cert_path.as_ref())?;
        let key_pem = read_pem(key_path.as_ref())?;
        let config = server_config_from_pem(&cert_pem, &key_pem)?;
        Self::bind(addr, config).await.map_err(ServerError::from)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl std::fmt::Debug for TlsListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsListener")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    fs::read(path)
        .map_err(|e| ServerError::Tls(format!("failed to read {}: {}", path.display(), e)))
}

#[async_trait]
impl Listener for TlsListener {
    type Transport = TlsServerTransport;

    async fn accept(&mut self) -> std::io::Result<Self::Transport> {
        let (tcp, peer_addr) = self.inner.accept().await?;
        tracing::debug!(peer = %peer_addr, "Accepted TCP connection, TLS handshake pending");
        tcp.set_nodelay(true)?;
        Ok(TlsServerTransport {
            acceptor: self.acceptor.clone(),
            tcp,
            peer_addr,
        })
    }
}

/// Accepted TCP connection that completes the TLS handshake when run
pub struct TlsServerTransport {
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    peer_addr: SocketAddr,
}

impl TlsServerTransport {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait]
impl Transport for TlsServerTransport {
    type Error = ProtocolError;

    async fn run(
        self,
        incoming_tx: mpsc::Sender<Message>,
        outgoing_rx: mpsc::UnboundedReceiver<Message>,
    ) -> Result<(), Self::Error> {
        let stream = self.acceptor.accept(self.tcp).await.map_err(|e| {
            tracing::warn!(peer = %self.peer_addr, error = %e, "TLS handshake failed");
            ProtocolError::from(e)
        })?;
        LineTransport::new(stream).run(incoming_tx, outgoing_rx).await
    }
}
