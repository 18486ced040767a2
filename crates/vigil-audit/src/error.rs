//! Audit error types.

use thiserror::Error;
use vigil_crypto::{ContentHash, KeyVersion};

/// Errors raised by the audit subsystem.
#[derive(Debug, Error)]
pub enum AuditError {
    /// An entry's previous hash does not match its predecessor's content hash.
    #[error("chain break at sequence {sequence}: expected previous {expected}, found {found}")]
    ChainBreak {
        /// Sequence of the entry whose link is broken.
        sequence: u64,
        /// Content hash of the predecessor.
        expected: ContentHash,
        /// Previous hash recorded in the entry.
        found: ContentHash,
    },

    /// Recomputing an entry's content hash did not reproduce the stored value.
    #[error("tampered entry at sequence {sequence}: stored {stored}, recomputed {computed}")]
    Tamper {
        /// Sequence of the altered entry.
        sequence: u64,
        /// Hash stored in the entry.
        stored: ContentHash,
        /// Hash recomputed from the entry's fields.
        computed: ContentHash,
    },

    /// A signature failed to verify or named an unknown key version.
    #[error("invalid signature at sequence {sequence} (key {key_version}): {reason}")]
    Signature {
        /// Sequence of the entry.
        sequence: u64,
        /// Key version recorded in the entry.
        key_version: KeyVersion,
        /// Why verification failed.
        reason: String,
    },

    /// Sequences are missing between two stored entries.
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        /// Sequence that should have come next.
        expected: u64,
        /// Sequence actually found.
        found: u64,
    },

    /// Sequences at the end of a verified range are missing.
    #[error("chain truncated: sequences {expected}..={through} are missing")]
    Truncated {
        /// First missing sequence.
        expected: u64,
        /// Last sequence that should exist.
        through: u64,
    },

    /// The primary store was unreachable or rejected a write.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Startup configuration or chain state is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Critical fan-out did not reach the acknowledgement quorum.
    #[error("replication reached {acks} of {required} required acknowledgements: {detail}")]
    Replication {
        /// Sinks that acknowledged.
        acks: usize,
        /// Acknowledgements required.
        required: usize,
        /// Per-sink failures.
        detail: String,
    },

    /// An export could not be produced in full.
    #[error("export error: {0}")]
    Export(String),

    /// A correction or tombstone names a sequence that was never assigned.
    #[error("no entry with sequence {0} to reference")]
    InvalidReference(u64),

    /// The log has been shut down and accepts no more entries.
    #[error("audit log is shut down")]
    ShutDown,

    /// Underlying key-value store error.
    #[error("storage error: {0}")]
    Storage(#[from] vigil_storage::StorageError),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] vigil_crypto::CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vigil_config::ConfigError> for AuditError {
    fn from(err: vigil_config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl AuditError {
    /// Whether this error reports evidence of tampering or forgery.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::ChainBreak { .. }
                | Self::Tamper { .. }
                | Self::Signature { .. }
                | Self::SequenceGap { .. }
                | Self::Truncated { .. }
        )
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
