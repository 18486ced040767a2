//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vigil_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Key types
pub use crate::{KeyPair, KeyRing, KeyVersion, PublicKey, SigningIdentity};

// Signature
pub use crate::Signature;

// Hashing
pub use crate::{ContentHash, FieldHasher};

// Sealing
pub use crate::{SealedEnvelope, SealingKey};
