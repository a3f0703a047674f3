//! Transport service: owns the write side of every peer socket and the
//! request/response correlation.
//!
//! Payload-agnostic by construction. Relay keys only on the outer envelope
//! `id`; the inner payload is forwarded as raw JSON. Routing is strictly by
//! the session's `(controllerId, cardhostId)` pair through the sink maps,
//! never by iterating sockets.

use crate::domain::error::RelayError;
use crate::domain::pending::{PendingRequestStore, PendingStats, RelayOutcome};
use dashmap::DashMap;
use serde_json::Value;
use shared_types::{Envelope, CLOSE_NORMAL};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One outbound unit for a socket writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    /// A serialized JSON text frame
    Frame(String),
    /// Close the socket with a code and reason
    Close(u16, &'static str),
}

/// Write side of one peer socket.
pub type Sink = mpsc::Sender<SinkCommand>;

/// Identity of one sink registration. Unregistration is conditional on it,
/// so a socket that was displaced cannot tear down its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

struct SinkEntry {
    id: ConnectionId,
    sink: Sink,
    connected_at: Instant,
    last_activity: Instant,
}

/// Sink registry plus pending-request correlation.
pub struct TransportService {
    controllers: DashMap<String, SinkEntry>,
    cardhosts: DashMap<String, SinkEntry>,
    pending: PendingRequestStore,
    write_timeout: Duration,
    next_connection: AtomicU64,
}

impl TransportService {
    /// Create a transport whose pending requests share `relay_timeout` and
    /// whose socket writes are bounded by `write_timeout`.
    pub fn new(relay_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            controllers: DashMap::new(),
            cardhosts: DashMap::new(),
            pending: PendingRequestStore::new(relay_timeout),
            write_timeout,
            next_connection: AtomicU64::new(1),
        }
    }

    fn entry(&self, sink: Sink) -> SinkEntry {
        SinkEntry {
            id: ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed)),
            sink,
            connected_at: Instant::now(),
            last_activity: Instant::now(),
        }
    }

    /// Install the controller write side for a session token. A displaced
    /// registration under the same token gets a close frame.
    pub fn register_controller(&self, session_token: &str, sink: Sink) -> ConnectionId {
        let entry = self.entry(sink);
        let id = entry.id;
        if let Some(displaced) = self.controllers.insert(session_token.to_string(), entry) {
            debug!(session_token = session_token, "Replacing controller connection");
            let _ = displaced
                .sink
                .try_send(SinkCommand::Close(CLOSE_NORMAL, "connection replaced"));
        }
        id
    }

    /// Install the cardhost write side for a peer id. A displaced
    /// registration under the same id gets a close frame.
    pub fn register_cardhost(&self, cardhost_id: &str, sink: Sink) -> ConnectionId {
        let entry = self.entry(sink);
        let id = entry.id;
        if let Some(displaced) = self.cardhosts.insert(cardhost_id.to_string(), entry) {
            debug!(cardhost_id = cardhost_id, "Replacing cardhost connection");
            let _ = displaced
                .sink
                .try_send(SinkCommand::Close(CLOSE_NORMAL, "connection replaced"));
        }
        id
    }

    /// Remove a controller registration, if it is still the one `conn`
    /// refers to.
    pub fn unregister_controller(&self, session_token: &str, conn: ConnectionId) {
        let _ = self
            .controllers
            .remove_if(session_token, |_, entry| entry.id == conn);
    }

    /// Remove a cardhost registration, if it is still the one `conn`
    /// refers to, and fail every pending request targeting it.
    ///
    /// Returns false when the registration was already replaced by a newer
    /// socket, in which case nothing is torn down.
    pub fn unregister_cardhost(&self, cardhost_id: &str, conn: ConnectionId) -> bool {
        let removed = self
            .cardhosts
            .remove_if(cardhost_id, |_, entry| entry.id == conn)
            .is_some();
        if removed {
            self.pending
                .fail_all_for_cardhost(cardhost_id, RelayError::CardhostOffline);
        }
        removed
    }

    /// Whether a cardhost currently has a live sink.
    pub fn is_cardhost_connected(&self, cardhost_id: &str) -> bool {
        self.cardhosts.contains_key(cardhost_id)
    }

    /// Relay a request envelope to a cardhost and install its waiter.
    ///
    /// Returns the receiver the caller awaits via [`Self::await_response`].
    /// Fails fast with `BadRequest` (no string id), `DuplicateRequestId`,
    /// `CardhostOffline`, or `SendFailed`; every failure path removes the
    /// waiter it installed.
    pub async fn relay_to_cardhost(
        &self,
        session_token: &str,
        cardhost_id: &str,
        envelope: Envelope,
    ) -> Result<oneshot::Receiver<RelayOutcome>, RelayError> {
        let request_id = envelope
            .id
            .clone()
            .ok_or_else(|| RelayError::BadRequest("rpc-request requires a string id".into()))?;

        let rx = self
            .pending
            .register(cardhost_id, &request_id, session_token)?;

        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.cancel(cardhost_id, &request_id);
                return Err(RelayError::BadRequest(e.to_string()));
            }
        };

        let sink = match self.cardhosts.get(cardhost_id) {
            Some(entry) => entry.sink.clone(),
            None => {
                self.pending.cancel(cardhost_id, &request_id);
                return Err(RelayError::CardhostOffline);
            }
        };

        if sink
            .send_timeout(SinkCommand::Frame(frame), self.write_timeout)
            .await
            .is_err()
        {
            warn!(
                cardhost_id = cardhost_id,
                request_id = %request_id,
                "Write to cardhost sink failed"
            );
            self.pending.cancel(cardhost_id, &request_id);
            return Err(RelayError::SendFailed);
        }

        if let Some(mut entry) = self.cardhosts.get_mut(cardhost_id) {
            entry.last_activity = Instant::now();
        }
        Ok(rx)
    }

    /// Await the outcome for a relayed request.
    ///
    /// Exactly one of response or error is observed: the deadline only
    /// claims the timeout if it removes the pending entry first, and a
    /// response that won that race is still delivered.
    pub async fn await_response(
        &self,
        cardhost_id: &str,
        request_id: &str,
        mut rx: oneshot::Receiver<RelayOutcome>,
    ) -> RelayOutcome {
        match tokio::time::timeout(self.pending.timeout(), &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => {
                debug!(
                    cardhost_id = cardhost_id,
                    request_id = request_id,
                    "Pending entry dropped without resolution"
                );
                Err(RelayError::Timeout)
            }
            Err(_elapsed) => {
                if self.pending.cancel(cardhost_id, request_id) {
                    self.pending.note_timeout();
                    Err(RelayError::Timeout)
                } else {
                    // A response removed the entry first; collect it.
                    match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Err(RelayError::Timeout),
                    }
                }
            }
        }
    }

    /// Feed one incoming cardhost frame into correlation.
    ///
    /// `rpc-response` resolves its waiter when one is pending; a late or
    /// unknown response is dropped silently. `rpc-event` is reserved and
    /// dropped. Anything else is ignored at this level.
    pub fn handle_cardhost_incoming(&self, cardhost_id: &str, value: &Value) {
        let Some(envelope) = Envelope::from_value(value) else {
            return;
        };
        match envelope.kind.as_str() {
            "rpc-response" => {
                let Some(id) = envelope.id.clone() else {
                    debug!(cardhost_id = cardhost_id, "rpc-response without id dropped");
                    return;
                };
                self.pending.complete(cardhost_id, &id, envelope);
            }
            "rpc-event" => {
                debug!(cardhost_id = cardhost_id, "Dropping reserved rpc-event");
            }
            other => {
                debug!(
                    cardhost_id = cardhost_id,
                    kind = other,
                    "Ignoring non-rpc frame at transport level"
                );
            }
        }
    }

    /// Forward a frame to the controller socket bound to a session.
    pub async fn relay_to_controller(
        &self,
        session_token: &str,
        frame: String,
    ) -> Result<(), RelayError> {
        let sink = match self.controllers.get(session_token) {
            Some(entry) => entry.sink.clone(),
            None => return Err(RelayError::ControllerGone),
        };
        if sink
            .send_timeout(SinkCommand::Frame(frame), self.write_timeout)
            .await
            .is_err()
        {
            self.controllers.remove(session_token);
            return Err(RelayError::ControllerGone);
        }
        if let Some(mut entry) = self.controllers.get_mut(session_token) {
            entry.last_activity = Instant::now();
        }
        Ok(())
    }

    /// One-shot notification to a cardhost (e.g. `controller-connected`).
    /// Best effort: returns whether the frame was handed to the sink.
    pub async fn notify_cardhost(&self, cardhost_id: &str, frame: String) -> bool {
        let sink = match self.cardhosts.get(cardhost_id) {
            Some(entry) => entry.sink.clone(),
            None => return false,
        };
        sink.send_timeout(SinkCommand::Frame(frame), self.write_timeout)
            .await
            .is_ok()
    }

    /// Sweep pending entries whose waiters never fired. Driven by the
    /// periodic cleanup task.
    pub fn sweep_expired(&self) -> usize {
        self.pending.remove_expired()
    }

    /// Drain every waiter and close every sink. Called on shutdown.
    pub fn shutdown(&self) {
        let drained = self.pending.drain_all(RelayError::ShuttingDown);
        if drained > 0 {
            warn!(drained = drained, "Drained pending requests at shutdown");
        }
        for entry in self.controllers.iter() {
            let _ = entry
                .sink
                .try_send(SinkCommand::Close(CLOSE_NORMAL, "router shutting down"));
        }
        for entry in self.cardhosts.iter() {
            let _ = entry
                .sink
                .try_send(SinkCommand::Close(CLOSE_NORMAL, "router shutting down"));
        }
        self.controllers.clear();
        self.cardhosts.clear();
    }

    /// Number of registered cardhost sinks.
    pub fn connected_cardhost_count(&self) -> usize {
        self.cardhosts.len()
    }

    /// Number of registered controller sinks.
    pub fn connected_controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Number of in-flight relayed requests.
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    /// Correlation statistics.
    pub fn pending_stats(&self) -> &PendingStats {
        self.pending.stats()
    }
}
