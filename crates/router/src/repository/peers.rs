//! Peer store.

use crate::domain::peer::{Peer, PeerSummary};
use chrono::Utc;
use dashmap::DashMap;

/// In-memory peer records keyed by derived peer id.
#[derive(Default)]
pub struct PeerRepository {
    peers: DashMap<String, Peer>,
}

impl PeerRepository {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, or refresh the key material of an existing record.
    /// The `authenticated` flag of a prior record is preserved.
    pub fn upsert(&self, peer_id: &str, public_key: Vec<u8>) {
        match self.peers.get_mut(peer_id) {
            Some(mut existing) => {
                existing.public_key = public_key;
            }
            None => {
                self.peers
                    .insert(peer_id.to_string(), Peer::new(peer_id.to_string(), public_key));
            }
        }
    }

    /// Fetch a copy of a peer record.
    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.peers.get(peer_id).map(|p| p.clone())
    }

    /// Flip a peer to authenticated.
    pub fn set_authenticated(&self, peer_id: &str) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut peer) => {
                peer.authenticated = true;
                peer.authenticated_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Flip a peer to unauthenticated, keeping the record so the peer can
    /// re-initiate later.
    pub fn set_disconnected(&self, peer_id: &str) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut peer) => {
                peer.authenticated = false;
                true
            }
            None => false,
        }
    }

    /// Whether the peer is currently authenticated.
    pub fn is_authenticated(&self, peer_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .map(|p| p.authenticated)
            .unwrap_or(false)
    }

    /// Summaries of all authenticated peers.
    pub fn list_authenticated(&self) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .filter(|entry| entry.value().authenticated)
            .map(|entry| PeerSummary {
                peer_id: entry.key().clone(),
                authenticated_at: entry.value().authenticated_at,
            })
            .collect()
    }

    /// Number of authenticated peers.
    pub fn authenticated_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|entry| entry.value().authenticated)
            .count()
    }
}
