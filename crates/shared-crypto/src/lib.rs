//! # CardLink Crypto
//!
//! Identity derivation and Ed25519 signing primitives shared by the router
//! and both peer clients.
//!
//! Peers are identified by a deterministic hash of their public key
//! (`peer_` + base64url(SHA-256(SPKI))), so no peer can choose its own
//! identifier. Possession of the matching private key is proven by signing
//! the canonical JSON encoding of a router-issued challenge.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod canonical;
pub mod errors;
pub mod identity;
pub mod signatures;

pub use canonical::{canonical_json, challenge_signing_bytes};
pub use errors::CryptoError;
pub use identity::{derive_peer_id, random_base64, verify_peer_id, PEER_ID_PREFIX};
pub use signatures::{
    decode_public_key, encode_spki, verify_signature, Ed25519KeyPair, Ed25519PublicKey,
    Ed25519Signature,
};

/// Nonce length for authentication challenges, in bytes.
pub const CHALLENGE_NONCE_LEN: usize = 32;

/// Token length for session tokens, in bytes.
pub const SESSION_TOKEN_LEN: usize = 32;
