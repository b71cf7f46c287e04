//! Standalone nodelink server
//!
//! Logs every event and answers every request with `{}`.
//!
//! ```text
//! nodelink-server --listen 127.0.0.1:9966 --password secret --cert localhost.crt --key localhost.key
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nodelink::server::transport::{Listener, TcpListener, TlsListener};
use nodelink::{Server, ServerConfig, ServerEvent};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nodelink-server", about = "Accept authenticated nodelink sessions")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9966")]
    listen: String,

    /// TOML file with session settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared secret; overrides the config file
    #[arg(long)]
    password: Option<String>,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path).context("loading server config")?,
        None => ServerConfig::default(),
    };
    if let Some(password) = args.password {
        config.password = password;
    }

    match (args.cert, args.key) {
        (Some(cert), Some(key)) => {
            let listener = TlsListener::bind_with_files(&args.listen, cert, key)
                .await
                .with_context(|| format!("binding TLS listener on {}", args.listen))?;
            tracing::info!(addr = %listener.local_addr()?, "Listening with TLS");
            serve(config, listener).await
        }
        _ => {
            let listener = TcpListener::bind(&args.listen)
                .await
                .with_context(|| format!("binding TCP listener on {}", args.listen))?;
            tracing::warn!(addr = %listener.local_addr()?, "Listening without TLS");
            serve(config, listener).await
        }
    }
}

async fn serve<L: Listener>(config: ServerConfig, listener: L) -> Result<()> {
    let (server, mut events) = Server::bind(config, listener);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ServerEvent::Authenticated(id) => {
                        tracing::info!(session = %id, "authenticated a client")
                    }
                    ServerEvent::Message(id, payload) => {
                        tracing::info!(session = %id, ?payload, "message")
                    }
                    ServerEvent::Request(id, request) => {
                        tracing::info!(session = %id, payload = ?request.payload, "request");
                        if let Err(e) = request.responder.send(json!({})) {
                            tracing::warn!(session = %id, error = %e, "Failed to respond");
                        }
                    }
                    ServerEvent::Close(id) => tracing::info!(session = %id, "closed"),
                    ServerEvent::Error(id, error) => {
                        tracing::warn!(session = ?id, error = %error, "error")
                    }
                    ServerEvent::Timeout(id) => tracing::warn!(session = %id, "timeout"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                server.close().await;
                break;
            }
        }
    }

    Ok(())
}
