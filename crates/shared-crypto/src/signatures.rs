//! # Ed25519 Signatures
//!
//! Challenge signing and verification for peer authentication.
//!
//! Public keys travel on the wire as base64 SPKI (RFC 8410 DER, 44 bytes).
//! Verification also accepts a raw 32-byte key. Malformed keys or signatures
//! make verification return `false` rather than erroring into caller logic.

use crate::canonical::challenge_signing_bytes;
use crate::CryptoError;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::Zeroize;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410).
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Raw Ed25519 public key length.
const RAW_KEY_LEN: usize = 32;

/// SPKI-encoded Ed25519 public key length.
const SPKI_KEY_LEN: usize = ED25519_SPKI_PREFIX.len() + RAW_KEY_LEN;

/// Wrap a raw 32-byte Ed25519 key in its SPKI DER envelope.
pub fn encode_spki(raw: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SPKI_KEY_LEN);
    out.extend_from_slice(&ED25519_SPKI_PREFIX);
    out.extend_from_slice(raw);
    out
}

/// Extract the raw key from SPKI bytes; raw 32-byte keys pass through.
pub fn decode_public_key(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    let raw: &[u8] = match bytes.len() {
        RAW_KEY_LEN => bytes,
        SPKI_KEY_LEN if bytes[..ED25519_SPKI_PREFIX.len()] == ED25519_SPKI_PREFIX => {
            &bytes[ED25519_SPKI_PREFIX.len()..]
        }
        _ => return Err(CryptoError::InvalidPublicKey),
    };
    let mut out = [0u8; 32];
    out.copy_from_slice(raw);
    Ok(out)
}

/// Verify an Ed25519 signature over the canonical JSON encoding of a
/// challenge string. Never panics; malformed inputs verify as `false`.
pub fn verify_signature(public_key: &[u8], challenge: &str, signature: &[u8]) -> bool {
    let raw = match decode_public_key(public_key) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    let verifying_key = match VerifyingKey::from_bytes(&raw) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig_bytes: [u8; 64] = match signature.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(&challenge_signing_bytes(challenge), &sig)
        .is_ok()
}

/// Ed25519 public key (raw 32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey([u8; 32]);

impl Ed25519PublicKey {
    /// Create from raw bytes, validating the curve point.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SPKI DER encoding, as sent in `auth-init`.
    pub fn to_spki(&self) -> Vec<u8> {
        encode_spki(&self.0)
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature([u8; 64]);

impl Ed25519Signature {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Ed25519 keypair.
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret seed (32 bytes).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self { signing_key }
    }

    /// Get public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign raw bytes (deterministic, no RNG needed).
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Sign a challenge string over its canonical JSON encoding, the form
    /// the router verifies.
    pub fn sign_challenge(&self, challenge: &str) -> Ed25519Signature {
        self.sign(&challenge_signing_bytes(challenge))
    }

    /// Get secret seed (for serialization).
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Drop for Ed25519KeyPair {
    fn drop(&mut self) {
        // Zeroize secret key material
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}
