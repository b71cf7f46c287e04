//! TLS connector built on rustls
//!
//! The client trusts an explicit set of CA certificates loaded from PEM,
//! which is how a self-signed server certificate is pinned.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::{Connector, LineTransport};
use crate::ClientError;

/// Builds a rustls client configuration trusting the PEM certificates in `ca_pem`
pub fn client_config_from_pem(ca_pem: &[u8]) -> Result<Arc<ClientConfig>, ClientError> {
    let mut roots = RootCertStore::empty();
    let mut reader = BufReader::new(ca_pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ClientError::Tls(format!("invalid CA certificate: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("rejected CA certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(ClientError::Tls("no CA certificate found".to_string()));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// TLS over TCP connector
#[derive(Clone)]
pub struct TlsConnector {
    addr: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// `server_name` must match a subject name of the server certificate
    pub fn new(
        addr: impl Into<String>,
        server_name: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Self, ClientError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ClientError::Tls(format!("invalid server name: {}", e)))?;

        Ok(Self {
            addr: addr.into(),
            server_name,
            connector: tokio_rustls::TlsConnector::from(config),
        })
    }

    pub fn from_ca_pem(
        addr: impl Into<String>,
        server_name: &str,
        ca_pem: &[u8],
    ) -> Result<Self, ClientError> {
        Self::new(addr, server_name, client_config_from_pem(ca_pem)?)
    }

    pub fn from_ca_file(
        addr: impl Into<String>,
        server_name: &str,
        ca_path: impl AsRef<Path>,
    ) -> Result<Self, ClientError> {
        let ca_path = ca_path.as_ref();
        let pem = fs::read(ca_path).map_err(|e| {
            ClientError::Tls(format!("failed to read {}: {}", ca_path.display(), e))
        })?;
        Self::from_ca_pem(addr, server_name, &pem)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("addr", &self.addr)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Transport = LineTransport<TlsStream<TcpStream>>;

    async fn connect(&self) -> std::io::Result<Self::Transport> {
        tracing::debug!(addr = %self.addr, "Connecting over TLS");
        let tcp = TcpStream::connect(&self.addr).await?;
        tcp.set_nodelay(true)?;
        let stream = self.connector.connect(self.server_name.clone(), tcp).await?;
        Ok(LineTransport::new(stream))
    }
}
