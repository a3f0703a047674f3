//! Challenge store.

use crate::domain::peer::Challenge;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// Live challenges keyed by peer id. At most one per peer.
#[derive(Default)]
pub struct ChallengeRepository {
    challenges: DashMap<String, Challenge>,
}

impl ChallengeRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a challenge, superseding any prior one for the peer.
    pub fn put(&self, challenge: Challenge) {
        self.challenges.insert(challenge.peer_id.clone(), challenge);
    }

    /// Remove and return a peer's challenge. Verification is one-shot, so
    /// the challenge leaves the store on success and failure alike.
    pub fn take(&self, peer_id: &str) -> Option<Challenge> {
        self.challenges.remove(peer_id).map(|(_, c)| c)
    }

    /// Remove challenges older than `ttl`. Returns the number removed.
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        let before = self.challenges.len();
        self.challenges
            .retain(|_, challenge| challenge.issued_at.elapsed() <= ttl);
        let removed = before.saturating_sub(self.challenges.len());
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired challenges");
        }
        removed
    }

    /// Number of live challenges.
    pub fn count(&self) -> usize {
        self.challenges.len()
    }
}
