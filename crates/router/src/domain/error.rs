//! Router error taxonomies.
//!
//! `AuthError` and `RelayError` carry the outcome of one operation on one
//! socket; both map onto the stable wire codes in `shared_types::ErrorCode`.
//! Repository-local failures never cross this boundary: they are logged and
//! swallowed where they occur.

use shared_types::ErrorCode;
use thiserror::Error;

/// Authentication verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No peer record for this id
    #[error("peer is not registered")]
    NotRegistered,
    /// No live challenge for this peer
    #[error("no challenge outstanding")]
    NoChallenge,
    /// Challenge outlived its TTL
    #[error("challenge expired")]
    ChallengeExpired,
    /// Presented challenge differs from the stored one
    #[error("challenge mismatch")]
    ChallengeMismatch,
}

/// Relay and transport failures, surfaced in-band to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Envelope missing a string `id`
    #[error("bad request: {0}")]
    BadRequest(String),
    /// `id` already pending for this cardhost
    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),
    /// No response within the relay deadline
    #[error("RPC relay timeout")]
    Timeout,
    /// Write to the cardhost socket failed
    #[error("send to cardhost failed")]
    SendFailed,
    /// Target cardhost not connected or just left
    #[error("cardhost offline")]
    CardhostOffline,
    /// No controller sink registered for the session
    #[error("controller gone")]
    ControllerGone,
    /// Controller has no bound session
    #[error("no relay session")]
    NoRelaySession,
    /// Router is draining for shutdown
    #[error("router shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// The stable wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::BadRequest(_) => ErrorCode::BadRequest,
            RelayError::DuplicateRequestId(_) => ErrorCode::DuplicateRequestId,
            RelayError::Timeout => ErrorCode::Timeout,
            RelayError::SendFailed => ErrorCode::SendFailed,
            RelayError::CardhostOffline => ErrorCode::CardhostOffline,
            RelayError::ControllerGone => ErrorCode::CardhostOffline,
            RelayError::NoRelaySession => ErrorCode::NoRelaySession,
            RelayError::ShuttingDown => ErrorCode::InternalError,
        }
    }
}

/// Service-level errors (startup and lifecycle, not wire-visible).
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
    /// Listener bind error
    #[error("server bind error: {0}")]
    Bind(String),
    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<super::config::ConfigError> for RouterError {
    fn from(e: super::config::ConfigError) -> Self {
        RouterError::Config(e.to_string())
    }
}
