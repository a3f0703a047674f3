//! Session service: token issuance and controller/cardhost binding.

use crate::domain::session::Session;
use crate::repository::SessionRepository;
use chrono::Utc;
use shared_crypto::{random_base64, SESSION_TOKEN_LEN};
use std::time::Duration;
use tracing::{debug, info};

/// Prefix carried by every session token.
pub const SESSION_TOKEN_PREFIX: &str = "sess_";

/// Issues and validates session tokens; associates a controller with a
/// cardhost. The token is what the transport layer keys on to route
/// responses back to the right controller.
pub struct SessionService {
    sessions: SessionRepository,
    ttl: Duration,
    idle: Duration,
}

impl SessionService {
    /// Create a service issuing sessions that expire after `ttl` and are
    /// reaped after `idle` without activity.
    pub fn new(ttl: Duration, idle: Duration) -> Self {
        Self {
            sessions: SessionRepository::new(),
            ttl,
            idle,
        }
    }

    /// Issue a session for an authenticated controller.
    pub fn create(&self, controller_id: &str) -> Session {
        let token = format!("{}{}", SESSION_TOKEN_PREFIX, random_base64(SESSION_TOKEN_LEN));
        let session = Session::new(token, controller_id.to_string(), self.ttl);
        info!(
            controller_id = controller_id,
            expires_at = %session.expires_at,
            "Created session"
        );
        self.sessions.insert(session.clone());
        session
    }

    /// Bind a cardhost to a session. Idempotent for the same cardhost; a
    /// prior session for the same `(controller, cardhost)` tuple is
    /// superseded and revoked.
    pub fn associate(&self, token: &str, cardhost_id: &str) -> bool {
        let Some(session) = self.sessions.get(token) else {
            return false;
        };

        if let Some(previous) = self.sessions.find_by_tuple(&session.controller_id, cardhost_id) {
            if previous.token != token {
                debug!(
                    controller_id = %session.controller_id,
                    cardhost_id = cardhost_id,
                    "Superseding prior session for tuple"
                );
                self.sessions.remove(&previous.token);
            }
        }

        self.sessions.set_cardhost(token, cardhost_id)
    }

    /// Look up a session, deleting it when expired.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let session = self.sessions.get(token)?;
        if session.expires_at <= Utc::now() {
            debug!(token = token, "Session expired on validation");
            self.sessions.remove(token);
            return None;
        }
        Some(session)
    }

    /// The session currently bound to a cardhost, if any.
    pub fn find_by_cardhost(&self, cardhost_id: &str) -> Option<Session> {
        self.sessions.find_by_cardhost(cardhost_id)
    }

    /// Record relay activity on a session.
    pub fn touch(&self, token: &str) {
        self.sessions.touch(token);
    }

    /// Explicitly revoke a session.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token);
        if removed {
            info!(token = token, "Session revoked");
        }
        removed
    }

    /// Remove sessions past their hard expiry.
    pub fn cleanup_expired(&self) -> usize {
        self.sessions.cleanup_expired()
    }

    /// Remove sessions idle past the configured threshold.
    pub fn cleanup_idle(&self) -> usize {
        self.sessions.cleanup_idle(self.idle)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.count()
    }
}
