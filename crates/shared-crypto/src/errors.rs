//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key bytes are not a valid Ed25519 key (raw or SPKI)
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Signature bytes have the wrong length or format
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    /// Signature did not verify against the message
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Base64 input could not be decoded
    #[error("Invalid base64: {0}")]
    InvalidBase64(String),

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },
}
