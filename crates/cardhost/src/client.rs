//! The cardhost agent's router connection.
//!
//! Boot sequence: connect to `/ws/cardhost`, prove key possession with the
//! challenge handshake, then serve relayed requests until the socket
//! closes. The card backend is initialized lazily on the first
//! `controller-connected` notification.

use crate::backend::CardBackend;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared_crypto::Ed25519KeyPair;
use shared_types::WireMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cardhost-side failures.
#[derive(Debug, Error)]
pub enum CardhostError {
    /// Underlying WebSocket failure
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// Router sent something the handshake cannot use
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Router rejected authentication
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// Socket closed before the handshake finished
    #[error("connection closed during handshake")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for CardhostError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CardhostError::WebSocket(e.to_string())
    }
}

/// An authenticated cardhost connection.
pub struct CardhostClient {
    cardhost_id: String,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl CardhostClient {
    /// Connect to the router and complete the challenge handshake.
    ///
    /// `url` is the full endpoint, e.g. `ws://127.0.0.1:3000/ws/cardhost`.
    pub async fn connect(url: &str, keypair: &Ed25519KeyPair) -> Result<Self, CardhostError> {
        let (stream, _) = connect_async(url).await?;
        let (mut write, mut read) = stream.split();

        let public_key = STANDARD.encode(keypair.public_key().to_spki());
        send_frame(&mut write, WireMessage::AuthInit { public_key }.to_frame()).await?;

        let challenge_msg = expect_type(&mut read, "auth-challenge").await?;
        let cardhost_id = challenge_msg
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| CardhostError::Protocol("auth-challenge missing uuid".into()))?
            .to_string();
        let challenge = challenge_msg
            .get("challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| CardhostError::Protocol("auth-challenge missing challenge".into()))?;

        let signature = STANDARD.encode(keypair.sign_challenge(challenge).as_bytes());
        send_frame(&mut write, WireMessage::AuthVerify { signature }.to_frame()).await?;

        expect_type(&mut read, "auth-success").await?;
        info!(cardhost_id = %cardhost_id, "Cardhost authenticated with router");

        Ok(Self {
            cardhost_id,
            write,
            read,
        })
    }

    /// The derived id controllers use to reach this cardhost.
    pub fn cardhost_id(&self) -> &str {
        &self.cardhost_id
    }

    /// Serve relayed requests until the socket closes.
    ///
    /// Every `rpc-request` is answered with exactly one `rpc-response`
    /// carrying the same id; backend failures become an error payload so
    /// the contract holds even when the card does not.
    pub async fn serve(mut self, backend: Arc<dyn CardBackend>) -> Result<(), CardhostError> {
        while let Some(frame) = self.read.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Cardhost socket error");
                    break;
                }
            };
            let text = match message {
                Message::Text(text) => text.to_string(),
                Message::Close(_) => {
                    debug!("Router closed cardhost socket");
                    break;
                }
                _ => continue,
            };
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                warn!("Dropping non-JSON frame from router");
                continue;
            };

            match value.get("type").and_then(Value::as_str) {
                Some("controller-connected") => {
                    debug!("Controller attached, initializing card backend");
                    if let Err(e) = backend.initialize().await {
                        error!(error = %e, "Card backend initialization failed");
                    }
                }
                Some("rpc-request") => {
                    if let Some(reply) = Self::answer(&backend, &value).await {
                        send_frame(&mut self.write, reply.to_frame()).await?;
                    }
                }
                Some("ping") => {
                    send_frame(&mut self.write, WireMessage::Pong.to_frame()).await?;
                }
                Some("error") => {
                    warn!(frame = %text, "Router reported an error");
                }
                Some(other) => {
                    debug!(kind = other, "Ignoring frame");
                }
                None => {
                    warn!("Dropping frame without type");
                }
            }
        }
        info!(cardhost_id = %self.cardhost_id, "Cardhost connection ended");
        Ok(())
    }

    async fn answer(backend: &Arc<dyn CardBackend>, request: &Value) -> Option<WireMessage> {
        let Some(id) = request.get("id").and_then(Value::as_str) else {
            warn!("rpc-request without string id; nothing to answer");
            return None;
        };
        let payload = request.get("payload").cloned().unwrap_or(Value::Null);

        let response_payload = match backend.transmit(&payload).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Card backend rejected APDU");
                // 6F00: no precise diagnosis
                json!({"sw": "6F00", "error": e.to_string()})
            }
        };
        Some(WireMessage::RpcResponse {
            id: id.to_string(),
            payload: response_payload,
        })
    }
}

async fn send_frame(
    write: &mut SplitSink<WsStream, Message>,
    frame: String,
) -> Result<(), CardhostError> {
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(CardhostError::from)
}

async fn expect_type(
    read: &mut SplitStream<WsStream>,
    wanted: &str,
) -> Result<Value, CardhostError> {
    while let Some(frame) = read.next().await {
        let message = frame?;
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => return Err(CardhostError::Closed),
            _ => continue,
        };
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| CardhostError::Protocol(format!("invalid JSON from router: {}", e)))?;
        match value.get("type").and_then(Value::as_str) {
            Some(kind) if kind == wanted => return Ok(value),
            Some("error") => {
                let code = value
                    .pointer("/error/code")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN");
                let message = value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                return Err(CardhostError::AuthRejected(format!("{}: {}", code, message)));
            }
            _ => continue,
        }
    }
    Err(CardhostError::Closed)
}
