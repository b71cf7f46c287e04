//! Full session over TLS with a self-signed certificate

mod common;

use common::*;
use nodelink::client::transport::TlsConnector;
use nodelink::server::transport::tls::server_config_from_pem;
use nodelink::server::transport::TlsListener;
use nodelink::{Client, ClientEvent, Server, ServerEvent, SessionError};
use serde_json::json;

struct SelfSigned {
    cert_pem: String,
    key_pem: String,
}

fn self_signed() -> SelfSigned {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    SelfSigned {
        cert_pem: certified.cert.pem(),
        key_pem: certified.key_pair.serialize_pem(),
    }
}

#[tokio::test]
async fn test_request_over_tls() {
    init_tracing();

    let pem = self_signed();
    let tls = server_config_from_pem(pem.cert_pem.as_bytes(), pem.key_pem.as_bytes()).unwrap();
    let listener = TlsListener::bind("127.0.0.1:0", tls).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, mut server_events) = Server::bind(server_config(), listener);

    let connector =
        TlsConnector::from_ca_pem(addr.to_string(), "localhost", pem.cert_pem.as_bytes()).unwrap();
    let (client, mut client_events) = Client::spawn(client_config(), connector);

    let id = wait_server_authenticated(&mut server_events).await;
    wait_client_authenticated(&mut client_events).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request(json!({"foo": "bar"})).await }
    });
    let request = wait_for(&mut server_events, |event| match event {
        ServerEvent::Request(from, request) if from == id => Some(request),
        _ => None,
    })
    .await;
    request.responder.send(json!({"bar": "qux"})).unwrap();
    assert_eq!(pending.await.unwrap().unwrap()["bar"], "qux");

    server.close().await;
}

#[tokio::test]
async fn test_untrusted_certificate_fails_to_connect() {
    init_tracing();

    let served = self_signed();
    let trusted = self_signed();

    let tls =
        server_config_from_pem(served.cert_pem.as_bytes(), served.key_pem.as_bytes()).unwrap();
    let listener = TlsListener::bind("127.0.0.1:0", tls).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, mut server_events) = Server::bind(server_config(), listener);

    let connector =
        TlsConnector::from_ca_pem(addr.to_string(), "localhost", trusted.cert_pem.as_bytes())
            .unwrap();
    let (client, mut client_events) = Client::spawn(client_config(), connector);

    wait_for(&mut client_events, |event| match event {
        ClientEvent::Authenticated => panic!("authenticated against an untrusted certificate"),
        ClientEvent::Error(SessionError::Connect(_)) => Some(()),
        _ => None,
    })
    .await;
    assert!(!client.is_authenticated());

    // the failed handshake never reaches authentication on the server
    wait_for(&mut server_events, |event| match event {
        ServerEvent::Authenticated(_) => panic!("untrusted client authenticated"),
        ServerEvent::Close(_) => Some(()),
        _ => None,
    })
    .await;

    server.close().await;
}
