//! The controller's router connection.
//!
//! The handshake (auth + cardhost binding) runs sequentially on the raw
//! socket; once bound, the socket splits into a writer channel and a
//! reader task that resolves in-flight requests by envelope id, so
//! responses may arrive out of order.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use shared_crypto::Ed25519KeyPair;
use shared_types::WireMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default deadline a controller waits for one relayed response. Slightly
/// above the router's own relay deadline so the router's synthesized
/// timeout envelope arrives first.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Controller-side failures.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Underlying WebSocket failure
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// Router sent something the handshake cannot use
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Router rejected authentication
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// Router answered a request with an in-band error envelope
    #[error("relay error {code}: {message}")]
    Relay {
        /// Stable error code, e.g. `TIMEOUT`
        code: String,
        /// Router-provided detail
        message: String,
    },
    /// No response envelope arrived within the request deadline
    #[error("request timed out")]
    RequestTimeout,
    /// Socket closed
    #[error("connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ControllerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ControllerError::WebSocket(e.to_string())
    }
}

type PendingReply = oneshot::Sender<Result<Value, ControllerError>>;

/// An authenticated controller bound to one cardhost.
pub struct ControllerClient {
    controller_id: String,
    cardhost_id: String,
    outbound: mpsc::Sender<String>,
    pending: Arc<DashMap<String, PendingReply>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    _writer: JoinHandle<()>,
    _reader: JoinHandle<()>,
}

impl ControllerClient {
    /// Connect, authenticate, and bind a session to `cardhost_id`.
    ///
    /// `url` is the full endpoint, e.g. `ws://127.0.0.1:3000/ws/controller`.
    pub async fn connect(
        url: &str,
        keypair: &Ed25519KeyPair,
        cardhost_id: &str,
    ) -> Result<Self, ControllerError> {
        let (stream, _) = connect_async(url).await?;
        let (mut write, mut read) = stream.split();

        // Auth handshake
        let public_key = STANDARD.encode(keypair.public_key().to_spki());
        send_frame(&mut write, WireMessage::AuthInit { public_key }.to_frame()).await?;

        let challenge_msg = expect_type(&mut read, "auth-challenge").await?;
        let controller_id = challenge_msg
            .get("controllerId")
            .and_then(Value::as_str)
            .ok_or_else(|| ControllerError::Protocol("auth-challenge missing controllerId".into()))?
            .to_string();
        let challenge = challenge_msg
            .get("challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| ControllerError::Protocol("auth-challenge missing challenge".into()))?;

        let signature = STANDARD.encode(keypair.sign_challenge(challenge).as_bytes());
        send_frame(&mut write, WireMessage::AuthVerify { signature }.to_frame()).await?;
        expect_type(&mut read, "auth-success").await?;
        debug!(controller_id = %controller_id, "Controller authenticated");

        // Bind the session
        send_frame(
            &mut write,
            WireMessage::ConnectCardhost {
                cardhost_uuid: cardhost_id.to_string(),
            }
            .to_frame(),
        )
        .await?;
        expect_type(&mut read, "connected").await?;
        info!(
            controller_id = %controller_id,
            cardhost_id = cardhost_id,
            "Controller bound to cardhost"
        );

        // Switch to correlated mode
        let pending: Arc<DashMap<String, PendingReply>> = Arc::new(DashMap::new());
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if write.send(Message::Text(frame.into())).await.is_err() {
                    debug!("Controller write side closed");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Controller socket error");
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text.to_string(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                dispatch_frame(&reader_pending, &value);
            }
            // Socket gone: fail whatever is still waiting
            let waiting: Vec<String> = reader_pending.iter().map(|e| e.key().clone()).collect();
            for id in waiting {
                if let Some((_, tx)) = reader_pending.remove(&id) {
                    let _ = tx.send(Err(ControllerError::Closed));
                }
            }
        });

        Ok(Self {
            controller_id,
            cardhost_id: cardhost_id.to_string(),
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            _writer: writer,
            _reader: reader,
        })
    }

    /// The derived id the router knows this controller by.
    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    /// The cardhost this session is bound to.
    pub fn cardhost_id(&self) -> &str {
        &self.cardhost_id
    }

    /// Override the per-request deadline.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    /// Issue one APDU exchange with an auto-generated request id.
    pub async fn transmit(&self, payload: Value) -> Result<Value, ControllerError> {
        let id = format!("r{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.transmit_with_id(&id, payload).await
    }

    /// Issue one APDU exchange with a caller-chosen request id.
    ///
    /// Resolves with the response payload, or the in-band error the router
    /// answered with (`TIMEOUT`, `CARDHOST_OFFLINE`, ...).
    pub async fn transmit_with_id(
        &self,
        id: &str,
        payload: Value,
    ) -> Result<Value, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), tx);

        let frame = WireMessage::RpcRequest {
            id: id.to_string(),
            payload,
        }
        .to_frame();
        if self.outbound.send(frame).await.is_err() {
            self.pending.remove(id);
            return Err(ControllerError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ControllerError::Closed),
            Err(_) => {
                self.pending.remove(id);
                Err(ControllerError::RequestTimeout)
            }
        }
    }
}

fn dispatch_frame(pending: &DashMap<String, PendingReply>, value: &Value) {
    match value.get("type").and_then(Value::as_str) {
        Some("rpc-response") => {
            let Some(id) = value.get("id").and_then(Value::as_str) else {
                return;
            };
            if let Some((_, tx)) = pending.remove(id) {
                let payload = value.get("payload").cloned().unwrap_or(Value::Null);
                let _ = tx.send(Ok(payload));
            } else {
                debug!(id = id, "Response for unknown request id");
            }
        }
        Some("error") => {
            let code = value
                .pointer("/error/code")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            match value.get("id").and_then(Value::as_str) {
                Some(id) => {
                    if let Some((_, tx)) = pending.remove(id) {
                        let _ = tx.send(Err(ControllerError::Relay { code, message }));
                    }
                }
                None => warn!(code = %code, message = %message, "Router error without id"),
            }
        }
        Some("pong") => {}
        Some(other) => debug!(kind = other, "Ignoring frame"),
        None => {}
    }
}

async fn send_frame(
    write: &mut SplitSink<WsStream, Message>,
    frame: String,
) -> Result<(), ControllerError> {
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(ControllerError::from)
}

async fn expect_type(
    read: &mut futures_util::stream::SplitStream<WsStream>,
    wanted: &str,
) -> Result<Value, ControllerError> {
    while let Some(frame) = read.next().await {
        let message = frame?;
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => return Err(ControllerError::Closed),
            _ => continue,
        };
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ControllerError::Protocol(format!("invalid JSON from router: {}", e)))?;
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
                return Err(ControllerError::AuthRejected(format!("{}: {}", code, message)));
            }
            _ => continue,
        }
    }
    Err(ControllerError::Closed)
}
