//! Content hashing using BLAKE3.
//!
//! [`ContentHash`] is the 256-bit digest that links audit entries together.
//! [`FieldHasher`] feeds it an unambiguous, length-prefixed field encoding so
//! that `("ab", "c")` and `("a", "bc")` never collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A BLAKE3 content hash (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The all-zero digest used as the previous hash of the first entry.
    pub const GENESIS: Self = Self([0u8; 32]);

    /// Hash arbitrary data.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash `data` under a domain-separation context string.
    #[must_use]
    pub fn hash_with_domain(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(domain);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Check if this is the genesis (all-zero) value.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a slice.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn try_from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(slice).ok().map(Self)
    }

    /// Encode as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from hex.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// First eight hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::GENESIS
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Incremental hasher over a sequence of length-prefixed fields.
///
/// Each field is written as its byte length (u64, little endian) followed by
/// the bytes. Optional fields write a presence byte first.
pub struct FieldHasher {
    inner: blake3::Hasher,
}

impl FieldHasher {
    /// Start a hasher bound to a domain-separation context.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            inner: blake3::Hasher::new_derive_key(domain),
        }
    }

    /// Append one field.
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.inner.update(&len.to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Append an optional field, distinguishing `None` from an empty value.
    pub fn optional(&mut self, bytes: Option<&[u8]>) -> &mut Self {
        match bytes {
            Some(bytes) => {
                self.inner.update(&[1]);
                self.field(bytes)
            },
            None => {
                self.inner.update(&[0]);
                self
            },
        }
    }

    /// Append a fixed-width integer.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.field(&value.to_le_bytes())
    }

    /// Finish and return the digest.
    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_basic() {
        let hash = ContentHash::hash(b"hello world");
        assert_eq!(hash, ContentHash::hash(b"hello world"));
        assert_ne!(hash, ContentHash::hash(b"different"));
    }

    #[test]
    fn test_genesis() {
        assert!(ContentHash::GENESIS.is_genesis());
        assert!(ContentHash::default().is_genesis());
        assert!(!ContentHash::hash(b"data").is_genesis());
    }

    #[test]
    fn test_hex_encoding() {
        let hash = ContentHash::hash(b"test");
        assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(ContentHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_domain_separation() {
        let one = ContentHash::hash_with_domain("domain1", b"same data");
        let two = ContentHash::hash_with_domain("domain2", b"same data");
        assert_ne!(one, two);
    }

    #[test]
    fn test_field_boundaries_matter() {
        let split_one = FieldHasher::new("test").field(b"ab").field(b"c").finish();
        let split_two = FieldHasher::new("test").field(b"a").field(b"bc").finish();
        assert_ne!(split_one, split_two);
    }

    #[test]
    fn test_optional_none_differs_from_empty() {
        let none = FieldHasher::new("test").optional(None).finish();
        let empty = FieldHasher::new("test").optional(Some(b"")).finish();
        assert_ne!(none, empty);
    }

    #[test]
    fn test_serde_is_hex() {
        let hash = ContentHash::hash(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let decoded: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }
}
