//! Relay choreography: the APDU round-trip and every way it can fail.

use super::harness::{endpoint, start_router, start_router_with, RawPeer};
use cardlink_cardhost::{CardhostClient, MockSmartCard};
use cardlink_controller::{ControllerClient, ControllerError};
use serde_json::json;
use shared_crypto::Ed25519KeyPair;
use std::sync::Arc;
use std::time::Duration;

/// Seed scenario 1: both peers authenticate, controller binds and issues a
/// SELECT, the mock card answers 9000, the controller sees it.
#[tokio::test]
async fn happy_path_apdu_roundtrip() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let card = Arc::new(MockSmartCard::new());
    let cardhost = CardhostClient::connect(&endpoint(addr, "/ws/cardhost"), &cardhost_keypair)
        .await
        .expect("cardhost connects");
    let cardhost_id = cardhost.cardhost_id().to_string();
    let serve_card = Arc::clone(&card);
    let serve_handle = tokio::spawn(async move {
        let _ = cardhost.serve(serve_card).await;
    });

    let controller_keypair = Ed25519KeyPair::generate();
    let controller = ControllerClient::connect(
        &endpoint(addr, "/ws/controller"),
        &controller_keypair,
        &cardhost_id,
    )
    .await
    .expect("controller binds");

    let reply = controller
        .transmit_with_id("r1", json!({"hex": "00A4040008A000000003000000"}))
        .await
        .expect("relay round-trip");
    assert_eq!(reply["sw"], "9000");

    // controller-connected initialized the card before the first request
    assert!(card.is_initialized());
    assert_eq!(card.received(), vec!["00A4040008A000000003000000"]);

    serve_handle.abort();
    router.stop();
}

/// Responses correlate by id, not by order: two in-flight requests resolve
/// to the right callers even when the card answers them back-to-back.
#[tokio::test]
async fn concurrent_requests_correlate_by_id() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let card = Arc::new(MockSmartCard::new());
    card.script("00B2010C00", "AABB", "9000");
    card.script("00B2020C00", "CCDD", "9000");
    let cardhost = CardhostClient::connect(&endpoint(addr, "/ws/cardhost"), &cardhost_keypair)
        .await
        .unwrap();
    let cardhost_id = cardhost.cardhost_id().to_string();
    let serve_card = Arc::clone(&card);
    let serve_handle = tokio::spawn(async move {
        let _ = cardhost.serve(serve_card).await;
    });

    let controller_keypair = Ed25519KeyPair::generate();
    let controller = Arc::new(
        ControllerClient::connect(
            &endpoint(addr, "/ws/controller"),
            &controller_keypair,
            &cardhost_id,
        )
        .await
        .unwrap(),
    );

    let c1 = Arc::clone(&controller);
    let t1 = tokio::spawn(async move { c1.transmit_with_id("a", json!({"hex": "00B2010C00"})).await });
    let c2 = Arc::clone(&controller);
    let t2 = tokio::spawn(async move { c2.transmit_with_id("b", json!({"hex": "00B2020C00"})).await });

    let r1 = t1.await.unwrap().unwrap();
    let r2 = t2.await.unwrap().unwrap();
    assert_eq!(r1["hex"], "AABB");
    assert_eq!(r2["hex"], "CCDD");

    serve_handle.abort();
    router.stop();
}

/// Seed scenario 3: the cardhost dies mid-request; the controller promptly
/// gets CARDHOST_OFFLINE for the in-flight id.
#[tokio::test]
async fn cardhost_crash_mid_request() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    let cardhost_id = cardhost.authenticate(&cardhost_keypair).await;

    let controller_keypair = Ed25519KeyPair::generate();
    let controller = ControllerClient::connect(
        &endpoint(addr, "/ws/controller"),
        &controller_keypair,
        &cardhost_id,
    )
    .await
    .unwrap();

    let pending = tokio::spawn(async move {
        controller
            .transmit_with_id("r1", json!({"hex": "0084000008"}))
            .await
    });

    // The cardhost sees the request and dies without answering.
    // (The binding notification may arrive first.)
    loop {
        let frame = cardhost.recv().await;
        if frame["type"] == "rpc-request" {
            assert_eq!(frame["id"], "r1");
            break;
        }
    }
    cardhost.close().await;

    let outcome = pending.await.unwrap();
    match outcome {
        Err(ControllerError::Relay { code, .. }) => assert_eq!(code, "CARDHOST_OFFLINE"),
        other => panic!("expected CARDHOST_OFFLINE relay error, got {:?}", other),
    }

    router.stop();
}

/// Seed scenario 4: a second request reusing a pending id is rejected
/// immediately with DUPLICATE_REQUEST_ID.
#[tokio::test]
async fn duplicate_request_id_rejected() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    let cardhost_id = cardhost.authenticate(&cardhost_keypair).await;

    let controller_keypair = Ed25519KeyPair::generate();
    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    controller.authenticate(&controller_keypair).await;
    controller
        .send(json!({"type": "connect-cardhost", "cardhostUuid": cardhost_id}))
        .await;
    let connected = controller.recv().await;
    assert_eq!(connected["type"], "connected");

    controller
        .send(json!({"type": "rpc-request", "id": "r1", "payload": {"hex": "00"}}))
        .await;
    controller
        .send(json!({"type": "rpc-request", "id": "r1", "payload": {"hex": "00"}}))
        .await;

    let error = controller.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "DUPLICATE_REQUEST_ID");
    assert_eq!(error["id"], "r1");

    router.stop();
}

/// Seed scenario 5: no response within the relay deadline synthesizes a
/// TIMEOUT error for that id, and the late response is silently dropped.
#[tokio::test]
async fn relay_timeout_then_late_response_dropped() {
    let (mut router, addr) = start_router_with(|config| {
        config.timeouts.relay = Duration::from_millis(300);
    })
    .await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    let cardhost_id = cardhost.authenticate(&cardhost_keypair).await;

    let controller_keypair = Ed25519KeyPair::generate();
    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    controller.authenticate(&controller_keypair).await;
    controller
        .send(json!({"type": "connect-cardhost", "cardhostUuid": cardhost_id}))
        .await;
    controller.recv().await; // connected

    controller
        .send(json!({"type": "rpc-request", "id": "r1", "payload": {"hex": "00"}}))
        .await;

    // The cardhost holds its reply past the deadline
    let error = controller.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "TIMEOUT");
    assert_eq!(error["error"]["message"], "RPC relay timeout");
    assert_eq!(error["id"], "r1");

    // A late answer must not reach the controller
    cardhost
        .send(json!({"type": "rpc-response", "id": "r1", "payload": {"sw": "9000"}}))
        .await;
    assert!(
        controller.recv_within(Duration::from_millis(400)).await.is_none(),
        "late response leaked to the controller"
    );

    router.stop();
}

/// A backend failure still honors the one-response-per-request contract.
#[tokio::test]
async fn backend_error_still_answers_request() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let card = Arc::new(MockSmartCard::new());
    let cardhost = CardhostClient::connect(&endpoint(addr, "/ws/cardhost"), &cardhost_keypair)
        .await
        .unwrap();
    let cardhost_id = cardhost.cardhost_id().to_string();
    let serve_card = Arc::clone(&card);
    let serve_handle = tokio::spawn(async move {
        let _ = cardhost.serve(serve_card).await;
    });

    let controller_keypair = Ed25519KeyPair::generate();
    let controller = ControllerClient::connect(
        &endpoint(addr, "/ws/controller"),
        &controller_keypair,
        &cardhost_id,
    )
    .await
    .unwrap();

    // Not hex at all: the mock rejects it, the agent answers with 6F00
    let reply = controller
        .transmit(json!({"not": "an apdu"}))
        .await
        .expect("request still answered");
    assert_eq!(reply["sw"], "6F00");

    serve_handle.abort();
    router.stop();
}

/// rpc-event from a cardhost is reserved: accepted and dropped.
#[tokio::test]
async fn rpc_event_is_accepted_and_dropped() {
    let (mut router, addr) = start_router().await;

    let cardhost_keypair = Ed25519KeyPair::generate();
    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    cardhost.authenticate(&cardhost_keypair).await;

    cardhost
        .send(json!({"type": "rpc-event", "payload": {"reader": "removed"}}))
        .await;

    // No error comes back and the socket stays healthy
    cardhost.send(json!({"type": "ping"})).await;
    let pong = cardhost.recv().await;
    assert_eq!(pong["type"], "pong");

    router.stop();
}
