//! Session record: the binding of an authenticated controller to a
//! connected cardhost.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// A router-issued session.
///
/// The token is the routing key the transport layer uses to find the
/// controller sink; `cardhost_id` is set by `associate` once the target
/// cardhost is chosen.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque unguessable token: `sess_` + 32 CSPRNG bytes, base64
    pub token: String,
    /// Authenticated controller that owns the session
    pub controller_id: String,
    /// Bound cardhost, once associated
    pub cardhost_id: Option<String>,
    /// Issue time (wall clock, surfaced to the controller)
    pub issued_at: DateTime<Utc>,
    /// Hard expiry (issue + session TTL)
    pub expires_at: DateTime<Utc>,
    /// Issue instant, for monotonic TTL arithmetic
    pub created: Instant,
    /// Last relayed activity, for idle reaping
    pub last_activity: Instant,
}

impl Session {
    /// Create a session for a controller, expiring after `ttl`.
    pub fn new(token: String, controller_id: String, ttl: std::time::Duration) -> Self {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            token,
            controller_id,
            cardhost_id: None,
            issued_at: now,
            expires_at,
            created: Instant::now(),
            last_activity: Instant::now(),
        }
    }
}
