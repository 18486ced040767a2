//! Hash chain engine.
//!
//! `content_hash = H(id, timestamp, level, category, action, actor, details,
//! metadata, references, previous_hash, sequence)` with BLAKE3 in derive-key
//! mode. Every field is length-prefixed so no two field layouts collide.

use serde::{Deserialize, Serialize};
use vigil_core::{EntryId, Severity, Timestamp};
use vigil_crypto::{ContentHash, FieldHasher, SigningIdentity};

use crate::entry::{AuditEntry, RawEntry};
use crate::error::{AuditError, AuditResult};
use crate::value::{EntryMetadata, Payload};

/// Domain separation context for entry hashes.
pub const HASH_DOMAIN: &str = "vigil 2024 audit entry v1";

/// Borrowed view of every hashed field except the chain position.
pub(crate) struct HashInput<'a> {
    pub(crate) id: &'a EntryId,
    pub(crate) timestamp: &'a Timestamp,
    pub(crate) level: Severity,
    pub(crate) category: &'a str,
    pub(crate) action: &'a str,
    pub(crate) actor: Option<&'a str>,
    pub(crate) details: &'a Payload,
    pub(crate) metadata: &'a EntryMetadata,
    pub(crate) references: Option<u64>,
}

impl HashInput<'_> {
    pub(crate) fn digest(&self, previous_hash: &ContentHash, sequence: u64) -> ContentHash {
        // serde_json cannot fail on these types; an empty fallback still hashes deterministically.
        let details = serde_json::to_vec(self.details).unwrap_or_default();
        let metadata = serde_json::to_vec(self.metadata).unwrap_or_default();
        let references = self.references.map(u64::to_le_bytes);

        FieldHasher::new(HASH_DOMAIN)
            .field(self.id.as_bytes())
            .field(self.timestamp.canonical().as_bytes())
            .field(self.level.as_str().as_bytes())
            .field(self.category.as_bytes())
            .field(self.action.as_bytes())
            .optional(self.actor.map(str::as_bytes))
            .field(&details)
            .field(&metadata)
            .optional(references.as_ref().map(<[u8; 8]>::as_slice))
            .field(previous_hash.as_bytes())
            .u64(sequence)
            .finish()
    }
}

/// Position of the chain head.
///
/// Owned by the sequencer; nothing else advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Content hash of the newest entry, or genesis.
    pub last_hash: ContentHash,
    /// Sequence of the newest entry, 0 before the first.
    pub last_sequence: u64,
    /// Timestamp of the newest entry.
    #[serde(default)]
    pub last_timestamp: Option<Timestamp>,
}

impl ChainState {
    /// State of an empty chain.
    #[must_use]
    pub fn genesis() -> Self {
        Self {
            last_hash: ContentHash::GENESIS,
            last_sequence: 0,
            last_timestamp: None,
        }
    }

    /// State with `entry` as the head.
    #[must_use]
    pub fn after(entry: &AuditEntry) -> Self {
        Self {
            last_hash: entry.content_hash,
            last_sequence: entry.sequence,
            last_timestamp: Some(entry.timestamp),
        }
    }

    /// Whether no entry has been chained yet.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.last_sequence == 0
    }

    /// Sequence the next entry will receive.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Configuration`] if the sequence space is exhausted.
    pub fn next_sequence(&self) -> AuditResult<u64> {
        self.last_sequence
            .checked_add(1)
            .ok_or_else(|| AuditError::Configuration("sequence space exhausted".to_owned()))
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Link `raw` onto the chain head, sign it, and advance `state`.
///
/// The timestamp is clamped so it never precedes the previous entry's.
///
/// # Errors
///
/// Returns an error if the sequence space is exhausted. `state` is left
/// untouched in that case.
pub fn chain(raw: RawEntry, state: &mut ChainState, signer: &SigningIdentity) -> AuditResult<AuditEntry> {
    let sequence = state.next_sequence()?;
    let timestamp = match state.last_timestamp {
        Some(floor) => raw.timestamp.not_before(floor),
        None => raw.timestamp,
    };
    let raw = RawEntry { timestamp, ..raw };
    let previous_hash = state.last_hash;
    let content_hash = raw.hash_input().digest(&previous_hash, sequence);
    let signature = signer.sign(content_hash.as_bytes());

    let entry = AuditEntry {
        id: raw.id,
        timestamp: raw.timestamp,
        level: raw.level,
        category: raw.category,
        action: raw.action,
        actor: raw.actor,
        details: raw.details,
        metadata: raw.metadata,
        references: raw.references,
        sequence,
        previous_hash,
        content_hash,
        key_version: signer.version(),
        signature,
    };
    *state = ChainState::after(&entry);
    Ok(entry)
}
