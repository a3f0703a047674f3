//! Peer and challenge records.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// A registered peer (controller or cardhost; same schema).
///
/// The `peer_id` is derived from `public_key` and never chosen by the
/// peer; re-initiation with the same key always lands on the same record.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Derived identifier: `peer_` + base64url(SHA-256(publicKey))
    pub peer_id: String,
    /// Public key bytes exactly as presented (SPKI DER)
    pub public_key: Vec<u8>,
    /// Whether the peer has proven key possession on a live socket
    pub authenticated: bool,
    /// When the current authentication happened
    pub authenticated_at: Option<DateTime<Utc>>,
    /// First registration time
    pub registered_at: DateTime<Utc>,
}

impl Peer {
    /// Create a fresh, unauthenticated record.
    pub fn new(peer_id: String, public_key: Vec<u8>) -> Self {
        Self {
            peer_id,
            public_key,
            authenticated: false,
            authenticated_at: None,
            registered_at: Utc::now(),
        }
    }
}

/// A live authentication challenge. At most one per peer; superseded on
/// re-initiation, consumed on verification.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Peer the challenge was issued to
    pub peer_id: String,
    /// Base64 nonce (32 CSPRNG bytes)
    pub nonce: String,
    /// Issue instant, for TTL arithmetic
    pub issued_at: Instant,
}

impl Challenge {
    /// Issue a challenge now.
    pub fn new(peer_id: String, nonce: String) -> Self {
        Self {
            peer_id,
            nonce,
            issued_at: Instant::now(),
        }
    }
}

/// Read-only view of an authenticated peer, for `list` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    /// Derived identifier
    pub peer_id: String,
    /// When the peer authenticated
    pub authenticated_at: Option<DateTime<Utc>>,
}
