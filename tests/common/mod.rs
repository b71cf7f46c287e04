//! Shared helpers for the end-to-end tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use nodelink::client::transport::TcpConnector;
use nodelink::server::transport::TcpListener;
use nodelink::{Client, ClientConfig, ClientEvent, Server, ServerConfig, ServerEvent, SessionId};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub const PASSWORD: &str = "12345";

/// How long a test waits for any single event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        keepalive_interval_ms: 0,
        ..ServerConfig::new(PASSWORD)
    }
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        reconnect_interval_ms: 0,
        ..ClientConfig::new(PASSWORD)
    }
}

pub async fn start_server(
    config: ServerConfig,
) -> (Server, UnboundedReceiver<ServerEvent>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, events) = Server::bind(config, listener);
    (server, events, addr)
}

pub fn start_client(
    config: ClientConfig,
    addr: SocketAddr,
) -> (Client, UnboundedReceiver<ClientEvent>) {
    Client::spawn(config, TcpConnector::new(addr.to_string()))
}

pub async fn next_server_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("server event channel closed")
}

pub async fn next_client_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event channel closed")
}

/// Skips events until `pick` returns `Some`
pub async fn wait_for<E, T>(
    events: &mut UnboundedReceiver<E>,
    mut pick: impl FnMut(E) -> Option<T>,
) -> T {
    timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_server_authenticated(events: &mut UnboundedReceiver<ServerEvent>) -> SessionId {
    wait_for(events, |event| match event {
        ServerEvent::Authenticated(id) => Some(id),
        _ => None,
    })
    .await
}

pub async fn wait_client_authenticated(events: &mut UnboundedReceiver<ClientEvent>) {
    wait_for(events, |event| matches!(event, ClientEvent::Authenticated).then_some(())).await
}

/// Starts a server and a client and waits until both sides are authenticated
pub async fn connected_pair(
    server_config: ServerConfig,
    client_config: ClientConfig,
) -> (
    Server,
    UnboundedReceiver<ServerEvent>,
    Client,
    UnboundedReceiver<ClientEvent>,
    SessionId,
) {
    let (server, mut server_events, addr) = start_server(server_config).await;
    let (client, mut client_events) = start_client(client_config, addr);

    let id = wait_server_authenticated(&mut server_events).await;
    wait_client_authenticated(&mut client_events).await;

    (server, server_events, client, client_events, id)
}

/// Drains whatever is queued without waiting
pub fn drain<E>(events: &mut UnboundedReceiver<E>) -> Vec<E> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
