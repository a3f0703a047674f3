//! Cardhost socket handler.
//!
//! Two phases: `authenticating` -> `rpc`. Once authenticated the socket is
//! registered as the cardhost's sink and every incoming frame feeds the
//! transport correlation; on close all pending requests targeting this
//! cardhost fail over to the controllers that issued them.

use crate::service::RouterState;
use crate::ws::{send_close, send_frame, spawn_writer};
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use serde_json::Value;
use shared_types::{ErrorBody, ErrorCode, WireMessage, CLOSE_POLICY_VIOLATION};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Authenticating,
    Rpc,
}

const KNOWN_TYPES: &[&str] = &["auth-init", "auth-verify", "rpc-response", "rpc-event", "ping"];

struct CardhostConnection {
    state: Arc<RouterState>,
    tx: mpsc::Sender<crate::transport::SinkCommand>,
    phase: Phase,
    cardhost_id: Option<String>,
    issued_challenge: Option<String>,
    conn: Option<crate::transport::ConnectionId>,
}

/// Handle one cardhost socket for its whole life.
pub async fn handle(state: Arc<RouterState>, socket: WebSocket) {
    info!("New cardhost connection");
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.sink_buffer);
    let writer = spawn_writer(ws_tx, rx);

    let mut conn = CardhostConnection {
        state,
        tx,
        phase: Phase::Authenticating,
        cardhost_id: None,
        issued_challenge: None,
        conn: None,
    };

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if conn.handle_frame(&text).await.is_break() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    if conn.handle_frame(&text).await.is_break() {
                        break;
                    }
                }
                Err(_) => {
                    conn.send_error(ErrorCode::UnknownMessage, "binary frame is not UTF-8")
                        .await;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!("Cardhost close frame received");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Cardhost socket error");
                break;
            }
        }
    }

    conn.teardown().await;
    drop(conn);
    let _ = writer.await;
}

impl CardhostConnection {
    async fn send(&self, msg: WireMessage) {
        send_frame(&self.tx, msg.to_frame()).await;
    }

    async fn send_error(&self, code: ErrorCode, message: &str) {
        self.send(WireMessage::Error {
            id: None,
            error: ErrorBody::new(code, message),
        })
        .await;
    }

    async fn handle_frame(&mut self, text: &str) -> ControlFlow<()> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                self.send_error(ErrorCode::UnknownMessage, "frame is not valid JSON")
                    .await;
                return ControlFlow::Continue(());
            }
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            self.send_error(ErrorCode::UnknownMessage, "missing string 'type'")
                .await;
            return ControlFlow::Continue(());
        };

        match (self.phase, kind) {
            (Phase::Authenticating, "auth-init") => self.on_auth_init(&value).await,
            (Phase::Authenticating, "auth-verify") => self.on_auth_verify(&value).await,
            (Phase::Rpc, "rpc-response") | (Phase::Rpc, "rpc-event") => {
                // Correlation owns these; unknown ids are dropped there
                if let Some(cardhost_id) = self.cardhost_id.as_deref() {
                    self.state.transport.handle_cardhost_incoming(cardhost_id, &value);
                }
                ControlFlow::Continue(())
            }
            (Phase::Rpc, "ping") => {
                self.send(WireMessage::Pong).await;
                ControlFlow::Continue(())
            }
            (_, kind) if KNOWN_TYPES.contains(&kind) => {
                self.send_error(
                    ErrorCode::InvalidPhase,
                    &format!("'{}' not allowed in current phase", kind),
                )
                .await;
                ControlFlow::Continue(())
            }
            (_, kind) => {
                self.send_error(
                    ErrorCode::UnknownMessage,
                    &format!("unknown message type '{}'", kind),
                )
                .await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_auth_init(&mut self, value: &Value) -> ControlFlow<()> {
        let Some(public_key_b64) = value.get("publicKey").and_then(Value::as_str) else {
            self.send_error(ErrorCode::BadRequest, "auth-init requires publicKey")
                .await;
            return ControlFlow::Continue(());
        };
        let public_key = match STANDARD.decode(public_key_b64) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.send_error(ErrorCode::BadRequest, "publicKey is not valid base64")
                    .await;
                return ControlFlow::Continue(());
            }
        };

        let (cardhost_id, challenge) = self.state.cardhost_auth.initiate(&public_key);
        debug!(cardhost_id = %cardhost_id, "Cardhost auth initiated");
        self.cardhost_id = Some(cardhost_id.clone());
        self.issued_challenge = Some(challenge.clone());
        self.send(WireMessage::AuthChallenge {
            controller_id: None,
            uuid: Some(cardhost_id),
            challenge,
        })
        .await;
        ControlFlow::Continue(())
    }

    async fn on_auth_verify(&mut self, value: &Value) -> ControlFlow<()> {
        let (Some(cardhost_id), Some(challenge)) =
            (self.cardhost_id.clone(), self.issued_challenge.clone())
        else {
            self.send_error(ErrorCode::InvalidPhase, "auth-init required first")
                .await;
            return ControlFlow::Continue(());
        };
        let Some(signature_b64) = value.get("signature").and_then(Value::as_str) else {
            self.send_error(ErrorCode::BadRequest, "auth-verify requires signature")
                .await;
            return ControlFlow::Continue(());
        };
        let Ok(signature) = STANDARD.decode(signature_b64) else {
            self.send_error(ErrorCode::BadRequest, "signature is not valid base64")
                .await;
            return ControlFlow::Continue(());
        };

        match self
            .state
            .cardhost_auth
            .verify(&cardhost_id, &challenge, &signature)
        {
            Ok(true) => {
                self.phase = Phase::Rpc;
                self.issued_challenge = None;
                self.conn = Some(
                    self.state
                        .transport
                        .register_cardhost(&cardhost_id, self.tx.clone()),
                );
                info!(cardhost_id = %cardhost_id, "Cardhost online");
                self.send(WireMessage::AuthSuccess {
                    controller_id: None,
                    uuid: Some(cardhost_id),
                })
                .await;
                ControlFlow::Continue(())
            }
            Ok(false) => {
                self.send_error(ErrorCode::AuthFailed, "signature verification failed")
                    .await;
                send_close(&self.tx, CLOSE_POLICY_VIOLATION, "authentication failed").await;
                ControlFlow::Break(())
            }
            Err(e) => {
                self.send_error(ErrorCode::AuthFailed, &e.to_string()).await;
                send_close(&self.tx, CLOSE_POLICY_VIOLATION, "authentication failed").await;
                ControlFlow::Break(())
            }
        }
    }

    /// Socket is closing: drop the sink registration (failing pending
    /// requests over to their controllers) and the authenticated flag.
    /// A socket that was displaced by a newer registration for the same
    /// peer leaves that registration, and the peer's flag, alone.
    async fn teardown(&mut self) {
        if let (Some(cardhost_id), Some(conn)) = (self.cardhost_id.take(), self.conn.take()) {
            if self.state.transport.unregister_cardhost(&cardhost_id, conn) {
                self.state.cardhost_auth.disconnect(&cardhost_id);
            }
            info!(cardhost_id = %cardhost_id, "Cardhost connection closed");
        } else {
            info!("Cardhost connection closed before auth");
        }
    }
}
