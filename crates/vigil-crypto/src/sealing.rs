//! AES-256-GCM envelopes for confidential audit payloads.
//!
//! A single master secret is expanded into one key per purpose with BLAKE3
//! key derivation, so compromising one purpose key does not expose others.
//! The purpose string is bound as associated data.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

const NONCE_LEN: usize = 12;
const DERIVE_CONTEXT: &str = "vigil 2024 payload sealing v1";

/// Master secret for sealing payloads. Wiped on drop.
#[derive(ZeroizeOnDrop)]
pub struct SealingKey {
    master: [u8; 32],
}

impl SealingKey {
    /// Generate a random master secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut master = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut master);
        Self { master }
    }

    /// Create from a 32-byte master secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let master = <[u8; 32]>::try_from(bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self { master })
    }

    /// Create from base64 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not base64 or not 32 bytes.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| CryptoError::InvalidBase64Encoding)?,
        );
        Self::from_bytes(&bytes)
    }

    fn purpose_key(&self, purpose: &str) -> Zeroizing<[u8; 32]> {
        let mut material = Zeroizing::new(Vec::with_capacity(self.master.len().saturating_add(purpose.len())));
        material.extend_from_slice(&self.master);
        material.extend_from_slice(purpose.as_bytes());
        Zeroizing::new(blake3::derive_key(DERIVE_CONTEXT, &material))
    }

    /// Identifier of the key used for `purpose`, safe to store in the clear.
    #[must_use]
    pub fn key_id(&self, purpose: &str) -> String {
        let key = self.purpose_key(purpose);
        hex::encode(&blake3::hash(key.as_ref()).as_bytes()[..8])
    }

    /// Encrypt `plaintext` under the key for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SealingFailed`] if encryption fails.
    pub fn seal(&self, purpose: &str, plaintext: &[u8]) -> CryptoResult<SealedEnvelope> {
        let key = self.purpose_key(purpose);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| CryptoError::SealingFailed(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, Payload {
                msg: plaintext,
                aad: purpose.as_bytes(),
            })
            .map_err(|e| CryptoError::SealingFailed(e.to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
        framed.extend_from_slice(nonce.as_slice());
        framed.extend_from_slice(&ciphertext);

        Ok(SealedEnvelope {
            purpose: purpose.to_string(),
            key_id: self.key_id(purpose),
            ciphertext: STANDARD.encode(framed),
        })
    }

    /// Decrypt an envelope produced by [`SealingKey::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SealingFailed`] if the envelope was sealed under a
    /// different key or has been altered.
    pub fn open(&self, envelope: &SealedEnvelope) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if envelope.key_id != self.key_id(&envelope.purpose) {
            return Err(CryptoError::SealingFailed(format!(
                "envelope sealed under key {}, not held",
                envelope.key_id
            )));
        }
        let framed = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|_| CryptoError::InvalidBase64Encoding)?;
        if framed.len() <= NONCE_LEN {
            return Err(CryptoError::SealingFailed("envelope too short".into()));
        }
        let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
        let key = self.purpose_key(&envelope.purpose);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| CryptoError::SealingFailed(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload {
                msg: ciphertext,
                aad: envelope.purpose.as_bytes(),
            })
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::SealingFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey([REDACTED])")
    }
}

/// Opaque encrypted payload plus the metadata needed to find its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Purpose the key was derived for.
    pub purpose: String,
    /// Identifier of the purpose key.
    pub key_id: String,
    /// Base64 of `nonce || ciphertext || tag`.
    pub ciphertext: String,
}
