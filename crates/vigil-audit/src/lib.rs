//! Vigil Audit - tamper-evident, signed, hash-chained audit logging.
//!
//! This crate provides:
//! - An entry builder that sanitizes details and seals confidential payloads
//! - A single hash chain with Ed25519 signatures and versioned key rotation
//! - A fail-open buffered tier and a blocking, replicated tier for critical events
//! - Durable persistence to a primary store, a daily journal and an emergency file
//! - Restart recovery that never renumbers and records lost sequences
//! - Verification, retention archiving and export across hot and cold storage
//!
//! # Security Model
//!
//! Every entry carries the content hash of its predecessor and a signature
//! over its own content hash. Changing, removing or reordering any persisted
//! entry is detected by [`IntegrityVerifier`]. Entries are never edited in
//! place: corrections and erasures are new entries that reference the
//! original.
//!
//! # Example
//!
//! ```
//! use vigil_audit::{AuditEvent, AuditLog};
//! use vigil_crypto::{KeyPair, KeyVersion, SigningIdentity};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let signer = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
//! let log = AuditLog::builder(signer).build().await.unwrap();
//!
//! log.log_event(AuditEvent::info("authentication", "login").actor("alice"));
//! log.flush().await.unwrap();
//!
//! let report = log.verify_integrity(None, None).await.unwrap();
//! assert!(report.valid);
//! # });
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod alert;
mod archive;
mod builder;
mod chain;
mod checkpoint;
mod emergency;
mod entry;
mod error;
mod export;
mod journal;
mod log;
mod recovery;
mod replicator;
mod reservation;
mod sanitize;
mod scheduler;
mod sequencer;
mod store;
mod value;
mod verify;
mod writer;

pub use alert::{Alert, AlertHook, AlertKind, Alerter, RecordingAlertHook};
pub use archive::{ArchiveReport, Archiver, RetentionPolicy};
pub use builder::{AuditEvent, DEFAULT_SEAL_THRESHOLD, EntryBuilder, SEALING_PURPOSE, WITHHELD_MARKER};
pub use chain::{ChainState, HASH_DOMAIN, chain};
pub use checkpoint::{CHAIN_NAMESPACE, Checkpoint, CheckpointStore};
pub use emergency::{EmergencyLog, EmergencyRecord};
pub use entry::{AuditEntry, RawEntry};
pub use error::{AuditError, AuditResult};
pub use export::{ExportBundle, ExportFilter, ExportFormat, Exporter};
pub use journal::{Journal, read_all as read_journal};
pub use log::{AuditLog, AuditLogBuilder, ERASURE_CATEGORY, Ingested, KEYS_CATEGORY, Schedule};
pub use recovery::{GAP_ACTION, INTEGRITY_CATEGORY, RecoveryReport, SequenceGap, recover};
pub use replicator::{FileReplica, MemoryReplica, ReplicaSink, ReplicationReceipt, Replicator};
pub use reservation::Reservations;
pub use sanitize::{CONFIDENTIAL_MARKER, REDACTED, SENSITIVE_TERMS, Sanitized, Sanitizer};
pub use scheduler::AuditScheduler;
pub use sequencer::Sequencer;
pub use store::{
    ENTRIES_NAMESPACE, EntryStore, KvEntryStore, MemoryEntryStore, entry_key, get_anywhere, latest_anywhere,
    merged_bounds, read_merged,
};
pub use value::{Details, EntryMetadata, Payload, Value};
pub use verify::{IntegrityIssue, IntegrityVerifier, VerificationReport, VerificationStats};
pub use writer::{FlushReport, PersistenceWriter};
