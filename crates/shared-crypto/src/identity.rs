//! Deterministic peer identity.
//!
//! A peer id is a pure function of the public key the peer presented:
//! `peer_` + base64url(SHA-256(publicKey)) with `=` padding stripped.
//! Two initiations with the same public key always produce the same id.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix carried by every derived peer id.
pub const PEER_ID_PREFIX: &str = "peer_";

/// Derive the peer id for a public key. Total over arbitrary byte strings.
pub fn derive_peer_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("{}{}", PEER_ID_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}

/// Check that `peer_id` is the id derived from `public_key`.
pub fn verify_peer_id(peer_id: &str, public_key: &[u8]) -> bool {
    derive_peer_id(public_key) == peer_id
}

/// Generate `len` bytes from the OS CSPRNG, standard-base64 encoded.
/// Callers use at least 32 bytes for challenges and session tokens.
pub fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let pk = b"some public key bytes";
        assert_eq!(derive_peer_id(pk), derive_peer_id(pk));
    }

    #[test]
    fn test_prefix_and_charset() {
        let id = derive_peer_id(b"key");
        assert!(id.starts_with(PEER_ID_PREFIX));
        let body = &id[PEER_ID_PREFIX.len()..];
        assert!(!body.is_empty());
        assert!(body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!id.contains('='));
    }

    #[test]
    fn test_total_over_arbitrary_bytes() {
        // Any byte string derives, including empty and non-key material
        assert!(derive_peer_id(&[]).starts_with(PEER_ID_PREFIX));
        assert!(derive_peer_id(&[0xff; 1000]).starts_with(PEER_ID_PREFIX));
    }

    #[test]
    fn test_verify_peer_id_roundtrip() {
        let pk = b"alpha";
        let other = b"beta";
        let id = derive_peer_id(pk);
        assert!(verify_peer_id(&id, pk));
        assert!(!verify_peer_id(&id, other));
    }

    #[test]
    fn test_random_base64_unique() {
        let a = random_base64(32);
        let b = random_base64(32);
        assert_ne!(a, b);
        // 32 bytes -> 44 base64 chars
        assert_eq!(a.len(), 44);
    }
}
