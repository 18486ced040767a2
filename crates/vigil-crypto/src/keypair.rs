//! Ed25519 key pairs with secure memory handling.
//!
//! Signing keys are only ever loaded from an explicit source. There is no
//! load-or-generate path: a missing key file is an error for the caller to
//! surface, never a cue to mint a fresh identity.

use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::signature::Signature;

/// An Ed25519 key pair. The secret half is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    verifying_key: VerifyingKey,
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }

    /// Create from a 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not exactly 32 bytes.
    pub fn from_secret_key(bytes: &[u8]) -> CryptoResult<Self> {
        let mut secret = <[u8; 32]>::try_from(bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            verifying_key,
            signing_key,
        })
    }

    /// Create from a base64-encoded 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not base64 or does not decode to 32 bytes.
    pub fn from_base64_secret(encoded: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| CryptoError::InvalidBase64Encoding)?,
        );
        Self::from_secret_key(&bytes)
    }

    /// Load a secret key file written by [`KeyPair::write_new`].
    ///
    /// The file may contain base64 text or the raw 32 bytes. Symlinks are
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] if the file is missing, is a symlink or
    /// cannot be read, or a decoding error if its contents are malformed.
    pub fn load(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();
        let meta = std::fs::symlink_metadata(path)
            .map_err(|e| CryptoError::IoError(format!("{}: {e}", path.display())))?;
        if meta.file_type().is_symlink() {
            return Err(CryptoError::IoError(format!(
                "refusing to read key file {}: path is a symlink",
                path.display()
            )));
        }
        let bytes = Zeroizing::new(
            std::fs::read(path).map_err(|e| CryptoError::IoError(format!("{}: {e}", path.display())))?,
        );
        if bytes.len() == 32 {
            return Self::from_secret_key(&bytes);
        }
        let text = std::str::from_utf8(&bytes).map_err(|_| CryptoError::InvalidBase64Encoding)?;
        Self::from_base64_secret(text)
    }

    /// Write this key's secret as base64 to a new file with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] if the file already exists or cannot be written.
    pub fn write_new(&self, path: impl AsRef<Path>) -> CryptoResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptoError::IoError(e.to_string()))?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|e| CryptoError::IoError(format!("{}: {e}", path.display())))?;
        let encoded = self.secret_key_base64();
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| CryptoError::IoError(e.to_string()))
    }

    /// The secret key as base64, wiped on drop.
    #[must_use]
    pub fn secret_key_base64(&self) -> Zeroizing<String> {
        let secret = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(STANDARD.encode(secret.as_ref()))
    }

    /// Short identifier: hex of the first 8 public key bytes.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        self.public_key().key_id_hex()
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from(self.signing_key.sign(message))
    }

    /// Verify a signature made by this key pair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SignatureVerificationFailed`] if the signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        self.verifying_key
            .verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// The shareable public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id_hex())
            .finish_non_exhaustive()
    }
}

/// An Ed25519 public key, serialized as base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a slice, rejecting points that are not valid keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not 32 bytes or not a valid curve point.
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes = <[u8; 32]>::try_from(slice).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: slice.len(),
        })?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short identifier: hex of the first 8 bytes.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Encode as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decode from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not base64 or not a valid public key.
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|_| CryptoError::InvalidBase64Encoding)?;
        Self::try_from_slice(&bytes)
    }

    /// Verify a signature against this key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed or the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        key.verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.key_id_hex())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"entry hash");
        assert!(keypair.verify(b"entry hash", &signature).is_ok());
        assert!(keypair.public_key().verify(b"entry hash", &signature).is_ok());
        assert!(keypair.verify(b"other hash", &signature).is_err());
    }

    #[test]
    fn test_base64_secret_roundtrip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_base64_secret(&keypair.secret_key_base64()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            KeyPair::from_secret_key(&[1u8; 16]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("signing.key");
        let keypair = KeyPair::generate();
        keypair.write_new(&path).unwrap();

        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(loaded.public_key(), keypair.public_key());

        // Refuses to clobber an existing key.
        assert!(KeyPair::generate().write_new(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KeyPair::load(dir.path().join("absent.key")),
            Err(CryptoError::IoError(_))
        ));
    }

    #[test]
    fn test_load_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.key");
        std::fs::write(&path, [9u8; 32]).unwrap();
        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(
            loaded.public_key(),
            KeyPair::from_secret_key(&[9u8; 32]).unwrap().public_key()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_load_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.key");
        KeyPair::generate().write_new(&real).unwrap();
        let link = dir.path().join("link.key");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(KeyPair::load(&link).is_err());
    }

    #[test]
    fn test_public_key_serde() {
        let key = KeyPair::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
