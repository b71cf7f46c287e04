//! Standalone nodelink client
//!
//! Connects, authenticates, logs every event and answers every request with `{}`.
//!
//! ```text
//! nodelink-client --connect 127.0.0.1:9966 --password secret --ca localhost.crt
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nodelink::client::transport::{Connector, TcpConnector, TlsConnector};
use nodelink::{Client, ClientConfig, ClientEvent};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nodelink-client", about = "Connect to a nodelink server")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:9966")]
    connect: String,

    /// TOML file with session settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared secret; overrides the config file
    #[arg(long)]
    password: Option<String>,

    /// PEM file with the CA (or self-signed) certificate to trust; enables TLS
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Name the server certificate was issued for
    #[arg(long, default_value = "localhost")]
    server_name: String,
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
        Some(path) => ClientConfig::load(path).context("loading client config")?,
        None => ClientConfig::default(),
    };
    if let Some(password) = args.password {
        config.password = password;
    }

    match &args.ca {
        Some(ca) => {
            let connector = TlsConnector::from_ca_file(&args.connect, &args.server_name, ca)
                .context("configuring TLS")?;
            run(config, connector).await
        }
        None => {
            tracing::warn!("Connecting without TLS");
            run(config, TcpConnector::new(&args.connect)).await
        }
    }
}

async fn run<C: Connector>(config: ClientConfig, connector: C) -> Result<()> {
    let (client, mut events) = Client::spawn(config, connector);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Authenticated => tracing::info!("authenticated"),
                    ClientEvent::Message(payload) => tracing::info!(?payload, "message"),
                    ClientEvent::Request(request) => {
                        tracing::info!(payload = ?request.payload, "request");
                        if let Err(e) = request.responder.send(json!({})) {
                            tracing::warn!(error = %e, "Failed to respond");
                        }
                    }
                    ClientEvent::Close => tracing::info!("close"),
                    ClientEvent::Error(error) => tracing::warn!(error = %error, "error"),
                    ClientEvent::ReconnectAttempt => tracing::info!("reconnecting"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Disconnecting");
                client.disconnect()?;
                break;
            }
        }
    }

    Ok(())
}
