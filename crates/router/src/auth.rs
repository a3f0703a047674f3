//! Challenge/response authentication service.
//!
//! One instance per peer flavor (controller-side and cardhost-side) so the
//! two identifier spaces stay disjoint even though the behavior is
//! identical. A challenge is one-shot: it leaves the store on verification
//! success and failure alike, and a re-initiation supersedes it.

use crate::domain::error::AuthError;
use crate::domain::peer::{Challenge, PeerSummary};
use crate::repository::{ChallengeRepository, PeerRepository};
use shared_crypto::{derive_peer_id, random_base64, verify_signature, CHALLENGE_NONCE_LEN};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Authentication state for one peer flavor.
pub struct AuthService {
    peers: PeerRepository,
    challenges: ChallengeRepository,
    challenge_ttl: Duration,
}

impl AuthService {
    /// Create a service whose challenges live for `challenge_ttl`.
    pub fn new(challenge_ttl: Duration) -> Self {
        Self {
            peers: PeerRepository::new(),
            challenges: ChallengeRepository::new(),
            challenge_ttl,
        }
    }

    /// Begin authentication for a public key.
    ///
    /// Registers (or refreshes) the peer record, issues a fresh nonce
    /// superseding any prior challenge, and returns the derived peer id
    /// with the nonce to sign. Always succeeds: identity is a pure
    /// function of the presented key bytes.
    pub fn initiate(&self, public_key: &[u8]) -> (String, String) {
        let peer_id = derive_peer_id(public_key);
        self.peers.upsert(&peer_id, public_key.to_vec());

        let nonce = random_base64(CHALLENGE_NONCE_LEN);
        self.challenges
            .put(Challenge::new(peer_id.clone(), nonce.clone()));

        debug!(peer_id = %peer_id, "Issued auth challenge");
        (peer_id, nonce)
    }

    /// Verify a signed challenge.
    ///
    /// Typed failures cover the bookkeeping preconditions; a signature that
    /// simply does not verify returns `Ok(false)` and leaves the peer's
    /// `authenticated` flag untouched. Every path consumes the challenge.
    pub fn verify(
        &self,
        peer_id: &str,
        presented: &str,
        signature: &[u8],
    ) -> Result<bool, AuthError> {
        let peer = self.peers.get(peer_id).ok_or(AuthError::NotRegistered)?;
        let challenge = self.challenges.take(peer_id).ok_or(AuthError::NoChallenge)?;

        if challenge.issued_at.elapsed() > self.challenge_ttl {
            warn!(peer_id = %peer_id, "Challenge expired before verification");
            return Err(AuthError::ChallengeExpired);
        }
        if challenge.nonce != presented {
            warn!(peer_id = %peer_id, "Presented challenge does not match issued nonce");
            return Err(AuthError::ChallengeMismatch);
        }

        if verify_signature(&peer.public_key, presented, signature) {
            self.peers.set_authenticated(peer_id);
            info!(peer_id = %peer_id, "Peer authenticated");
            Ok(true)
        } else {
            warn!(peer_id = %peer_id, "Signature verification failed");
            Ok(false)
        }
    }

    /// Whether a peer is currently authenticated.
    pub fn is_authenticated(&self, peer_id: &str) -> bool {
        self.peers.is_authenticated(peer_id)
    }

    /// Mark a peer as disconnected. The record survives so the peer can
    /// re-initiate on a new socket.
    pub fn disconnect(&self, peer_id: &str) {
        if self.peers.set_disconnected(peer_id) {
            debug!(peer_id = %peer_id, "Peer disconnected");
        }
    }

    /// Summaries of currently authenticated peers.
    pub fn list_connected(&self) -> Vec<PeerSummary> {
        self.peers.list_authenticated()
    }

    /// Number of currently authenticated peers.
    pub fn authenticated_count(&self) -> usize {
        self.peers.authenticated_count()
    }

    /// Drop challenges past their TTL. Driven by the periodic cleanup task.
    pub fn cleanup_expired_challenges(&self) -> usize {
        self.challenges.cleanup_expired(self.challenge_ttl)
    }

    /// Number of live challenges (test and stats visibility).
    pub fn challenge_count(&self) -> usize {
        self.challenges.count()
    }
}
