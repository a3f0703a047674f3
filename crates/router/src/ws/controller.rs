//! Controller socket handler.
//!
//! Phase machine with one-way transitions:
//! `authenticating` -> `connecting` -> `rpc`. Phase-violating messages are
//! answered with `INVALID_PHASE` and the socket stays open; a failed
//! signature is fatal (`AUTH_FAILED`, close 1008).

use crate::service::RouterState;
use crate::ws::{send_close, send_frame, spawn_writer};
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use serde_json::Value;
use shared_types::{Envelope, ErrorBody, ErrorCode, WireMessage, CLOSE_POLICY_VIOLATION};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Authenticating,
    Connecting,
    Rpc,
}

/// Message types a controller may legitimately send in some phase. Anything
/// else is `UNKNOWN_MESSAGE` on this endpoint.
const KNOWN_TYPES: &[&str] = &["auth-init", "auth-verify", "connect-cardhost", "rpc-request", "ping"];

struct ControllerConnection {
    state: Arc<RouterState>,
    tx: mpsc::Sender<crate::transport::SinkCommand>,
    phase: Phase,
    controller_id: Option<String>,
    issued_challenge: Option<String>,
    /// Set once `connect-cardhost` succeeds
    binding: Option<Binding>,
}

struct Binding {
    session_token: String,
    cardhost_id: String,
    conn: crate::transport::ConnectionId,
}

/// Handle one controller socket for its whole life.
pub async fn handle(state: Arc<RouterState>, socket: WebSocket) {
    info!("New controller connection");
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.sink_buffer);
    let writer = spawn_writer(ws_tx, rx);

    let mut conn = ControllerConnection {
        state,
        tx,
        phase: Phase::Authenticating,
        controller_id: None,
        issued_challenge: None,
        binding: None,
    };

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if conn.handle_frame(&text).await.is_break() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                // Tolerate peers that frame JSON as binary
                match String::from_utf8(data) {
                    Ok(text) => {
                        if conn.handle_frame(&text).await.is_break() {
                            break;
                        }
                    }
                    Err(_) => {
                        conn.send_error(None, ErrorCode::UnknownMessage, "binary frame is not UTF-8")
                            .await;
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!("Controller close frame received");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Controller socket error");
                break;
            }
        }
    }

    conn.teardown().await;
    drop(conn);
    let _ = writer.await;
}

impl ControllerConnection {
    async fn send(&self, msg: WireMessage) {
        send_frame(&self.tx, msg.to_frame()).await;
    }

    async fn send_error(&self, id: Option<String>, code: ErrorCode, message: &str) {
        self.send(WireMessage::Error {
            id,
            error: ErrorBody::new(code, message),
        })
        .await;
    }

    async fn handle_frame(&mut self, text: &str) -> ControlFlow<()> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                self.send_error(None, ErrorCode::UnknownMessage, "frame is not valid JSON")
                    .await;
                return ControlFlow::Continue(());
            }
        };
        // Owned so the rpc arm can take the value apart
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => {
                self.send_error(None, ErrorCode::UnknownMessage, "missing string 'type'")
                    .await;
                return ControlFlow::Continue(());
            }
        };

        match (self.phase, kind.as_str()) {
            (Phase::Authenticating, "auth-init") => self.on_auth_init(&value).await,
            (Phase::Authenticating, "auth-verify") => self.on_auth_verify(&value).await,
            (Phase::Connecting, "connect-cardhost") => self.on_connect_cardhost(&value).await,
            (Phase::Rpc, "rpc-request") => self.on_rpc_request(value).await,
            (phase, "ping") if phase != Phase::Authenticating => {
                self.send(WireMessage::Pong).await;
                ControlFlow::Continue(())
            }
            (_, "rpc-request") => {
                // Before a session is bound there is nothing to relay on
                let id = value.get("id").and_then(Value::as_str).map(str::to_string);
                self.send_error(id, ErrorCode::NoRelaySession, "no relay session bound")
                    .await;
                ControlFlow::Continue(())
            }
            (_, kind) if KNOWN_TYPES.contains(&kind) => {
                self.send_error(
                    None,
                    ErrorCode::InvalidPhase,
                    &format!("'{}' not allowed in current phase", kind),
                )
                .await;
                ControlFlow::Continue(())
            }
            (_, kind) => {
                self.send_error(
                    None,
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
            self.send_error(None, ErrorCode::BadRequest, "auth-init requires publicKey")
                .await;
            return ControlFlow::Continue(());
        };
        let public_key = match STANDARD.decode(public_key_b64) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.send_error(None, ErrorCode::BadRequest, "publicKey is not valid base64")
                    .await;
                return ControlFlow::Continue(());
            }
        };

        let (controller_id, challenge) = self.state.controller_auth.initiate(&public_key);
        debug!(controller_id = %controller_id, "Controller auth initiated");
        self.controller_id = Some(controller_id.clone());
        self.issued_challenge = Some(challenge.clone());
        self.send(WireMessage::AuthChallenge {
            controller_id: Some(controller_id),
            uuid: None,
            challenge,
        })
        .await;
        ControlFlow::Continue(())
    }

    async fn on_auth_verify(&mut self, value: &Value) -> ControlFlow<()> {
        let (Some(controller_id), Some(challenge)) =
            (self.controller_id.clone(), self.issued_challenge.clone())
        else {
            self.send_error(None, ErrorCode::InvalidPhase, "auth-init required first")
                .await;
            return ControlFlow::Continue(());
        };
        let Some(signature_b64) = value.get("signature").and_then(Value::as_str) else {
            self.send_error(None, ErrorCode::BadRequest, "auth-verify requires signature")
                .await;
            return ControlFlow::Continue(());
        };
        let Ok(signature) = STANDARD.decode(signature_b64) else {
            self.send_error(None, ErrorCode::BadRequest, "signature is not valid base64")
                .await;
            return ControlFlow::Continue(());
        };

        match self
            .state
            .controller_auth
            .verify(&controller_id, &challenge, &signature)
        {
            Ok(true) => {
                self.phase = Phase::Connecting;
                self.issued_challenge = None;
                self.send(WireMessage::AuthSuccess {
                    controller_id: Some(controller_id),
                    uuid: None,
                })
                .await;
                ControlFlow::Continue(())
            }
            Ok(false) => {
                self.send_error(None, ErrorCode::AuthFailed, "signature verification failed")
                    .await;
                send_close(&self.tx, CLOSE_POLICY_VIOLATION, "authentication failed").await;
                ControlFlow::Break(())
            }
            Err(e) => {
                self.send_error(None, ErrorCode::AuthFailed, &e.to_string()).await;
                send_close(&self.tx, CLOSE_POLICY_VIOLATION, "authentication failed").await;
                ControlFlow::Break(())
            }
        }
    }

    async fn on_connect_cardhost(&mut self, value: &Value) -> ControlFlow<()> {
        // Phase guarantees an authenticated controller
        let controller_id = match self.controller_id.clone() {
            Some(id) => id,
            None => {
                self.send_error(None, ErrorCode::InternalError, "controller identity lost")
                    .await;
                send_close(&self.tx, shared_types::CLOSE_INTERNAL_ERROR, "internal error").await;
                return ControlFlow::Break(());
            }
        };
        let Some(cardhost_id) = value.get("cardhostUuid").and_then(Value::as_str) else {
            self.send_error(None, ErrorCode::BadRequest, "connect-cardhost requires cardhostUuid")
                .await;
            return ControlFlow::Continue(());
        };

        if !self.state.cardhost_auth.is_authenticated(cardhost_id)
            || !self.state.transport.is_cardhost_connected(cardhost_id)
        {
            self.send_error(None, ErrorCode::CardhostOffline, "cardhost is not connected")
                .await;
            return ControlFlow::Continue(());
        }

        let session = self.state.sessions.create(&controller_id);
        self.state.sessions.associate(&session.token, cardhost_id);
        let conn = self
            .state
            .transport
            .register_controller(&session.token, self.tx.clone());

        // Nudge the cardhost so it can lazily bring up its card stack
        if !self
            .state
            .transport
            .notify_cardhost(cardhost_id, WireMessage::ControllerConnected.to_frame())
            .await
        {
            debug!(cardhost_id = cardhost_id, "controller-connected notification not delivered");
        }

        info!(
            controller_id = %controller_id,
            cardhost_id = cardhost_id,
            "Controller bound to cardhost"
        );
        self.binding = Some(Binding {
            session_token: session.token,
            cardhost_id: cardhost_id.to_string(),
            conn,
        });
        self.phase = Phase::Rpc;
        self.send(WireMessage::Connected {
            cardhost_uuid: cardhost_id.to_string(),
        })
        .await;
        ControlFlow::Continue(())
    }

    async fn on_rpc_request(&mut self, value: Value) -> ControlFlow<()> {
        let request_id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(binding) = self.binding.as_ref() else {
            self.send_error(request_id, ErrorCode::NoRelaySession, "no relay session bound")
                .await;
            return ControlFlow::Continue(());
        };
        let token = binding.session_token.clone();
        let cardhost_id = binding.cardhost_id.clone();

        if self.state.sessions.validate(&token).is_none() {
            self.send_error(request_id, ErrorCode::NoRelaySession, "relay session expired")
                .await;
            return ControlFlow::Continue(());
        }
        self.state.sessions.touch(&token);

        let envelope = Envelope {
            kind: "rpc-request".to_string(),
            id: request_id.clone(),
            payload: value.get("payload").cloned(),
            error: None,
        };

        match self
            .state
            .transport
            .relay_to_cardhost(&token, &cardhost_id, envelope)
            .await
        {
            Err(e) => {
                self.send_error(request_id, e.code(), &e.to_string()).await;
                ControlFlow::Continue(())
            }
            Ok(rx) => {
                // Correlation id is present: relay_to_cardhost required it
                let request_id = request_id.unwrap_or_default();
                let state = Arc::clone(&self.state);
                tokio::spawn(async move {
                    let outcome = state
                        .transport
                        .await_response(&cardhost_id, &request_id, rx)
                        .await;
                    let envelope = match outcome {
                        Ok(envelope) => envelope,
                        Err(e) => Envelope::error(Some(request_id.clone()), e.code(), e.to_string()),
                    };
                    let frame = match serde_json::to_string(&envelope) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize relay outcome");
                            return;
                        }
                    };
                    if let Err(e) = state.transport.relay_to_controller(&token, frame).await {
                        debug!(
                            request_id = %request_id,
                            error = %e,
                            "Controller gone before relay outcome delivery"
                        );
                    }
                });
                ControlFlow::Continue(())
            }
        }
    }

    /// Socket is closing: release the transport registration and the
    /// authenticated flag. The cardhost stays registered for other
    /// sessions.
    async fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            self.state
                .transport
                .unregister_controller(&binding.session_token, binding.conn);
        }
        if let Some(controller_id) = self.controller_id.take() {
            self.state.controller_auth.disconnect(&controller_id);
            info!(controller_id = %controller_id, "Controller connection closed");
        } else {
            info!("Controller connection closed before auth");
        }
    }
}
