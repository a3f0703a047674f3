//! Test fixtures: a router on an ephemeral port and raw WebSocket peers
//! for frame-level assertions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cardlink_router::{RouterConfig, RouterService};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared_crypto::Ed25519KeyPair;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long a test waits for an expected frame before failing.
pub const RECV_DEADLINE: Duration = Duration::from_secs(5);

/// Start a router on 127.0.0.1 with an ephemeral port.
pub async fn start_router() -> (RouterService, SocketAddr) {
    start_router_with(|_| {}).await
}

/// Start a router with config tweaks (short relay timeouts etc).
pub async fn start_router_with(tweak: impl FnOnce(&mut RouterConfig)) -> (RouterService, SocketAddr) {
    let mut config = RouterConfig::default();
    config.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.port = 0;
    tweak(&mut config);
    let mut service = RouterService::new(config).expect("valid config");
    let addr = service.start().await.expect("router starts");
    (service, addr)
}

/// Endpoint URL for a peer flavor.
pub fn endpoint(addr: SocketAddr, path: &str) -> String {
    format!("ws://{}{}", addr, path)
}

/// A raw frame-level peer for protocol assertions.
pub struct RawPeer {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl RawPeer {
    /// Open a socket to one of the router's WS endpoints.
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let (stream, _) = connect_async(endpoint(addr, path))
            .await
            .expect("websocket connects");
        let (write, read) = stream.split();
        Self { write, read }
    }

    /// Send one JSON frame.
    pub async fn send(&mut self, value: Value) {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("frame sent");
    }

    /// Receive the next text frame as JSON, failing after the deadline.
    pub async fn recv(&mut self) -> Value {
        match self.recv_within(RECV_DEADLINE).await {
            Some(value) => value,
            None => panic!("expected a frame, got none within {:?}", RECV_DEADLINE),
        }
    }

    /// Receive the next text frame as JSON if one arrives in time.
    pub async fn recv_within(&mut self, deadline: Duration) -> Option<Value> {
        let result = tokio::time::timeout(deadline, async {
            while let Some(frame) = self.read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return serde_json::from_str::<Value>(&text).ok();
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        })
        .await;
        result.ok().flatten()
    }

    /// Receive until the socket closes, returning the close frame if the
    /// router sent one.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        let result = tokio::time::timeout(RECV_DEADLINE, async {
            while let Some(frame) = self.read.next().await {
                match frame {
                    Ok(Message::Close(close)) => return close,
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
            None
        })
        .await;
        result.ok().flatten()
    }

    /// Close the socket abruptly.
    pub async fn close(mut self) {
        let _ = self.write.close().await;
    }

    /// Run the full challenge handshake on this socket. Returns the
    /// derived peer id (`controllerId` or `uuid` depending on endpoint).
    pub async fn authenticate(&mut self, keypair: &Ed25519KeyPair) -> String {
        let public_key = STANDARD.encode(keypair.public_key().to_spki());
        self.send(json!({"type": "auth-init", "publicKey": public_key}))
            .await;

        let challenge_msg = self.recv().await;
        assert_eq!(challenge_msg["type"], "auth-challenge");
        let peer_id = challenge_msg
            .get("controllerId")
            .or_else(|| challenge_msg.get("uuid"))
            .and_then(Value::as_str)
            .expect("auth-challenge carries the derived id")
            .to_string();
        let challenge = challenge_msg["challenge"].as_str().expect("challenge");

        let signature = STANDARD.encode(keypair.sign_challenge(challenge).as_bytes());
        self.send(json!({"type": "auth-verify", "signature": signature}))
            .await;

        let success = self.recv().await;
        assert_eq!(success["type"], "auth-success");
        peer_id
    }
}
