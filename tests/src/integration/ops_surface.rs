//! Operational HTTP surface: /health, /stats, and the 404 fallback.

use super::harness::{endpoint, start_router};
use cardlink_cardhost::{CardhostClient, MockSmartCard};
use cardlink_controller::ControllerClient;
use serde_json::Value;
use shared_crypto::Ed25519KeyPair;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn http_get(addr: SocketAddr, path: &str) -> (u16, Value) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.trim())
        .unwrap_or("");
    let value = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_running() {
    let (mut router, addr) = start_router().await;

    let (status, body) = http_get(addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["running"], true);

    router.stop();
}

#[tokio::test]
async fn unknown_paths_are_404() {
    let (mut router, addr) = start_router().await;

    let (status, body) = http_get(addr, "/sessions").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "Not found");

    router.stop();
}

#[tokio::test]
async fn stats_track_peers_and_sessions() {
    let (mut router, addr) = start_router().await;

    let (_, empty) = http_get(addr, "/stats").await;
    assert_eq!(empty["running"], true);
    assert_eq!(empty["activeCardhosts"], 0);
    assert_eq!(empty["activeControllers"], 0);
    assert_eq!(empty["activeSessions"], 0);
    assert_eq!(empty["connectedCardhosts"], 0);

    let cardhost_keypair = Ed25519KeyPair::generate();
    let cardhost = CardhostClient::connect(&endpoint(addr, "/ws/cardhost"), &cardhost_keypair)
        .await
        .unwrap();
    let cardhost_id = cardhost.cardhost_id().to_string();
    let serve_handle = tokio::spawn(async move {
        let _ = cardhost.serve(Arc::new(MockSmartCard::new())).await;
    });

    let controller_keypair = Ed25519KeyPair::generate();
    let _controller = ControllerClient::connect(
        &endpoint(addr, "/ws/controller"),
        &controller_keypair,
        &cardhost_id,
    )
    .await
    .unwrap();

    let (_, live) = http_get(addr, "/stats").await;
    assert_eq!(live["activeCardhosts"], 1);
    assert_eq!(live["activeControllers"], 1);
    assert_eq!(live["activeSessions"], 1);
    assert_eq!(live["connectedCardhosts"], 1);

    serve_handle.abort();
    router.stop();
}
