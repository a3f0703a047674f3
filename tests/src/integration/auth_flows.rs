//! Authentication choreography: handshake, re-initiation, bad signatures,
//! and phase enforcement.

use super::harness::{start_router, RawPeer};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use shared_crypto::{derive_peer_id, Ed25519KeyPair};

#[tokio::test]
async fn controller_handshake_yields_derived_id() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    let controller_id = controller.authenticate(&keypair).await;

    // The id is the hash of the SPKI bytes we sent, not chosen by us
    assert_eq!(controller_id, derive_peer_id(&keypair.public_key().to_spki()));

    router.stop();
}

#[tokio::test]
async fn bad_signature_gets_auth_failed_and_1008() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    let public_key = STANDARD.encode(keypair.public_key().to_spki());
    controller
        .send(json!({"type": "auth-init", "publicKey": public_key}))
        .await;
    let challenge_msg = controller.recv().await;
    assert_eq!(challenge_msg["type"], "auth-challenge");

    // Sign a different string than the issued challenge
    let signature = STANDARD.encode(keypair.sign_challenge("not-the-challenge").as_bytes());
    controller
        .send(json!({"type": "auth-verify", "signature": signature}))
        .await;

    let error = controller.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "AUTH_FAILED");

    let close = controller.recv_close().await.expect("close frame");
    assert_eq!(u16::from(close.code), 1008);

    router.stop();
}

#[tokio::test]
async fn reinitiation_same_key_same_id_fresh_challenge() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();
    let public_key = STANDARD.encode(keypair.public_key().to_spki());

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;

    controller
        .send(json!({"type": "auth-init", "publicKey": public_key}))
        .await;
    let first = controller.recv().await;

    controller
        .send(json!({"type": "auth-init", "publicKey": public_key}))
        .await;
    let second = controller.recv().await;

    // Same derived id, different nonce
    assert_eq!(first["controllerId"], second["controllerId"]);
    assert_ne!(first["challenge"], second["challenge"]);

    // Only the second challenge verifies now
    let challenge = second["challenge"].as_str().unwrap();
    let signature = STANDARD.encode(keypair.sign_challenge(challenge).as_bytes());
    controller
        .send(json!({"type": "auth-verify", "signature": signature}))
        .await;
    let success = controller.recv().await;
    assert_eq!(success["type"], "auth-success");
    assert_eq!(success["controllerId"], first["controllerId"]);

    router.stop();
}

#[tokio::test]
async fn phase_violations_keep_socket_open() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;

    // connect-cardhost before auth: phase violation, non-fatal
    controller
        .send(json!({"type": "connect-cardhost", "cardhostUuid": "peer_x"}))
        .await;
    let error = controller.recv().await;
    assert_eq!(error["error"]["code"], "INVALID_PHASE");

    // Unknown type: non-fatal
    controller.send(json!({"type": "warp-drive"})).await;
    let error = controller.recv().await;
    assert_eq!(error["error"]["code"], "UNKNOWN_MESSAGE");

    // The same socket still authenticates fine afterwards
    controller.authenticate(&keypair).await;

    router.stop();
}

#[tokio::test]
async fn rpc_request_before_connect_is_no_relay_session() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    controller.authenticate(&keypair).await;

    controller
        .send(json!({"type": "rpc-request", "id": "r1", "payload": {"hex": "00A40400"}}))
        .await;
    let error = controller.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["code"], "NO_RELAY_SESSION");
    assert_eq!(error["id"], "r1");

    router.stop();
}

#[tokio::test]
async fn ping_pong_after_auth() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    cardhost.authenticate(&keypair).await;

    cardhost.send(json!({"type": "ping"})).await;
    let pong = cardhost.recv().await;
    assert_eq!(pong["type"], "pong");

    router.stop();
}

#[tokio::test]
async fn cardhost_reregistration_closes_displaced_socket() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut first = RawPeer::connect(addr, "/ws/cardhost").await;
    let id_first = first.authenticate(&keypair).await;

    let mut second = RawPeer::connect(addr, "/ws/cardhost").await;
    let id_second = second.authenticate(&keypair).await;
    assert_eq!(id_first, id_second);

    // The displaced socket is closed by the router
    let close = first.recv_close().await.expect("displaced socket closed");
    assert_eq!(u16::from(close.code), 1000);

    // Exactly one live cardhost sink remains
    assert_eq!(router.state().stats().connected_cardhosts, 1);

    router.stop();
}

#[tokio::test]
async fn connect_to_offline_cardhost_is_nonfatal() {
    let (mut router, addr) = start_router().await;
    let keypair = Ed25519KeyPair::generate();

    let mut controller = RawPeer::connect(addr, "/ws/controller").await;
    controller.authenticate(&keypair).await;

    controller
        .send(json!({"type": "connect-cardhost", "cardhostUuid": "peer_nobody"}))
        .await;
    let error = controller.recv().await;
    assert_eq!(error["error"]["code"], "CARDHOST_OFFLINE");

    // Still in connecting phase: a later connect to a real cardhost works
    let cardhost_keypair = Ed25519KeyPair::generate();
    let mut cardhost = RawPeer::connect(addr, "/ws/cardhost").await;
    let cardhost_id = cardhost.authenticate(&cardhost_keypair).await;

    controller
        .send(json!({"type": "connect-cardhost", "cardhostUuid": cardhost_id}))
        .await;
    let connected = controller.recv().await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["cardhostUuid"], cardhost_id);

    router.stop();
}
