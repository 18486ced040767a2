//! Errors from key handling, signing and payload sealing.

use thiserror::Error;

/// Failures in key material, signatures or sealed envelopes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key bytes of the wrong size.
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required size.
        expected: usize,
        /// Size supplied.
        actual: usize,
    },

    /// Signature bytes of the wrong size.
    #[error("signature must be {expected} bytes, got {actual}")]
    InvalidSignatureLength {
        /// Required size.
        expected: usize,
        /// Size supplied.
        actual: usize,
    },

    /// Bytes that do not decode to an ed25519 point.
    #[error("not an ed25519 public key: {0}")]
    InvalidPublicKey(String),

    /// The signature does not match the message under this key.
    #[error("signature does not verify")]
    SignatureVerificationFailed,

    /// The key ring has no public key for this version.
    #[error("key version {0} is not in the key ring")]
    UnknownKeyVersion(u32),

    /// Key versions are write-once in a ring.
    #[error("key version {0} is already bound to a different public key")]
    KeyVersionConflict(u32),

    /// Key or signature text was not base64.
    #[error("malformed base64")]
    InvalidBase64Encoding,

    /// AES-GCM sealing or unsealing failed.
    #[error("payload sealing failed: {0}")]
    SealingFailed(String),

    /// Reading or writing a key file failed.
    #[error("key file: {0}")]
    IoError(String),
}

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
