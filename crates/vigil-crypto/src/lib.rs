//! Vigil Crypto - cryptographic primitives for the audit chain.
//!
//! This crate provides:
//! - BLAKE3 content hashing with an unambiguous field encoding
//! - Ed25519 key pairs, public keys and signatures
//! - A versioned [`KeyRing`] so rotated keys keep verifying old entries
//! - AES-256-GCM sealed envelopes for confidential payloads
//!
//! # Example
//!
//! ```
//! use vigil_crypto::{ContentHash, KeyPair, KeyRing, KeyVersion};
//!
//! let keypair = KeyPair::generate();
//! let hash = ContentHash::hash(b"entry");
//! let signature = keypair.sign(hash.as_bytes());
//!
//! let mut ring = KeyRing::new();
//! ring.insert(KeyVersion::INITIAL, keypair.public_key()).unwrap();
//! assert!(ring.verify(KeyVersion::INITIAL, hash.as_bytes(), &signature).is_ok());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod keypair;
mod keyring;
mod sealing;
mod signature;

pub use error::{CryptoError, CryptoResult};
pub use hash::{ContentHash, FieldHasher};
pub use keypair::{KeyPair, PublicKey};
pub use keyring::{KeyRing, KeyVersion, SigningIdentity};
pub use sealing::{SealedEnvelope, SealingKey};
pub use signature::Signature;
