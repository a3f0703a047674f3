//! The full WebSocket message catalogue, as a tagged enum.
//!
//! `auth-challenge` and `auth-success` carry `controllerId` on the
//! controller endpoint and `uuid` on the cardhost endpoint; both fields are
//! optional here so one variant covers both wires.

use crate::error_code::ErrorBody;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every message either peer or the router may place in a text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Peer -> router: begin authentication
    AuthInit {
        /// Base64 SPKI Ed25519 public key
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    /// Router -> peer: challenge to sign
    AuthChallenge {
        /// Derived id, controller endpoint
        #[serde(rename = "controllerId", skip_serializing_if = "Option::is_none")]
        controller_id: Option<String>,
        /// Derived id, cardhost endpoint
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
        /// Base64 nonce to sign
        challenge: String,
    },
    /// Peer -> router: signed challenge
    AuthVerify {
        /// Base64 Ed25519 signature
        signature: String,
    },
    /// Router -> peer: authentication complete
    AuthSuccess {
        /// Derived id, controller endpoint
        #[serde(rename = "controllerId", skip_serializing_if = "Option::is_none")]
        controller_id: Option<String>,
        /// Derived id, cardhost endpoint
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
    },
    /// Controller -> router: bind a session to a cardhost
    ConnectCardhost {
        /// Target cardhost's derived id
        #[serde(rename = "cardhostUuid")]
        cardhost_uuid: String,
    },
    /// Router -> controller: session bound
    Connected {
        /// Bound cardhost's derived id
        #[serde(rename = "cardhostUuid")]
        cardhost_uuid: String,
    },
    /// Router -> cardhost: a controller has attached
    ControllerConnected,
    /// Controller -> router: relayed request
    RpcRequest {
        /// Correlation id, unique per outstanding request
        id: String,
        /// Opaque payload
        payload: Value,
    },
    /// Cardhost -> router: relayed response
    RpcResponse {
        /// Correlation id matching the request
        id: String,
        /// Opaque payload
        payload: Value,
    },
    /// Cardhost -> router: unsolicited event (reserved)
    RpcEvent {
        /// Opaque payload
        payload: Value,
    },
    /// Keepalive probe
    Ping,
    /// Keepalive reply
    Pong,
    /// In-band error
    Error {
        /// Request id this error answers, when relay-scoped
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Code and message
        error: ErrorBody,
    },
}

impl WireMessage {
    /// Serialize to a text frame. Infallible for this catalogue.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
