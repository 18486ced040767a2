//! Versioned public keys for verifying signatures across key rotations.
//!
//! Every signed entry records the [`KeyVersion`] that produced its
//! signature. The [`KeyRing`] maps each version to its public key so that
//! entries from every era stay verifiable after the active key changes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::{KeyPair, PublicKey};
use crate::signature::Signature;

/// Monotonic version number of a signing key. The first key is version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersion(pub u32);

impl KeyVersion {
    /// Version assigned to the first key of a chain.
    pub const INITIAL: Self = Self(1);

    /// The version a rotation installs.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyVersionConflict`] if the counter is exhausted.
    pub fn next(self) -> CryptoResult<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or(CryptoError::KeyVersionConflict(self.0))
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A private key together with the version it signs under.
#[derive(Debug)]
pub struct SigningIdentity {
    keypair: KeyPair,
    version: KeyVersion,
}

impl SigningIdentity {
    /// Bind a key pair to a version.
    #[must_use]
    pub fn new(keypair: KeyPair, version: KeyVersion) -> Self {
        Self { keypair, version }
    }

    /// The version this identity signs under.
    #[must_use]
    pub fn version(&self) -> KeyVersion {
        self.version
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Short key identifier.
    #[must_use]
    pub fn key_id_hex(&self) -> String {
        self.keypair.key_id_hex()
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

/// Registry of public keys indexed by version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRing {
    keys: BTreeMap<KeyVersion, PublicKey>,
}

impl KeyRing {
    /// Create an empty key ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under `version`.
    ///
    /// Registering the same key twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyVersionConflict`] if `version` is already bound to a
    /// different key.
    pub fn insert(&mut self, version: KeyVersion, key: PublicKey) -> CryptoResult<()> {
        match self.keys.get(&version) {
            Some(existing) if *existing != key => Err(CryptoError::KeyVersionConflict(version.0)),
            Some(_) => Ok(()),
            None => {
                self.keys.insert(version, key);
                Ok(())
            },
        }
    }

    /// Look up the key for a version.
    #[must_use]
    pub fn get(&self, version: KeyVersion) -> Option<&PublicKey> {
        self.keys.get(&version)
    }

    /// The highest registered version.
    #[must_use]
    pub fn latest_version(&self) -> Option<KeyVersion> {
        self.keys.keys().next_back().copied()
    }

    /// Number of registered versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no versions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate `(version, key)` pairs in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = (KeyVersion, &PublicKey)> {
        self.keys.iter().map(|(v, k)| (*v, k))
    }

    /// Verify `signature` over `message` with the key recorded for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownKeyVersion`] if the version is not registered,
    /// or [`CryptoError::SignatureVerificationFailed`] if the signature is invalid.
    pub fn verify(&self, version: KeyVersion, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        self.get(version)
            .ok_or(CryptoError::UnknownKeyVersion(version.0))?
            .verify(message, signature)
    }
}
