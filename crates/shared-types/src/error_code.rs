//! Stable error codes surfaced as in-band `error` envelopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error code identifiers carried in `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Message not allowed in the socket's current phase
    InvalidPhase,
    /// Signature verification failed or challenge expired
    AuthFailed,
    /// `rpc-request` with no bound session
    NoRelaySession,
    /// Target cardhost not connected or just left
    CardhostOffline,
    /// Request id already pending for this cardhost
    DuplicateRequestId,
    /// No response within the relay deadline
    Timeout,
    /// Write to the cardhost socket failed
    SendFailed,
    /// Message `type` not recognized
    UnknownMessage,
    /// Envelope malformed (e.g. missing string `id`)
    BadRequest,
    /// Unhandled server-side failure
    InternalError,
}

impl ErrorCode {
    /// The wire identifier for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPhase => "INVALID_PHASE",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::NoRelaySession => "NO_RELAY_SESSION",
            ErrorCode::CardhostOffline => "CARDHOST_OFFLINE",
            ErrorCode::DuplicateRequestId => "DUPLICATE_REQUEST_ID",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::SendFailed => "SEND_FAILED",
            ErrorCode::UnknownMessage => "UNKNOWN_MESSAGE",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `error` object inside an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code identifier
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
