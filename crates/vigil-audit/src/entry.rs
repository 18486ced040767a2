//! Audit entry types.
//!
//! A [`RawEntry`] is what the builder produces: sanitized, timestamped, not yet
//! placed in the chain. The sequencer turns it into an [`AuditEntry`] by
//! assigning a sequence number, linking it to its predecessor, hashing and
//! signing it. Entries are never edited after that.

use serde::{Deserialize, Serialize};
use vigil_core::{EntryId, Severity, Timestamp};
use vigil_crypto::{ContentHash, KeyRing, KeyVersion, Signature};

use crate::chain::HashInput;
use crate::error::{AuditError, AuditResult};
use crate::value::{EntryMetadata, Payload};

/// A sanitized entry awaiting its place in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// Creation time. The sequencer may move it forward, never back.
    pub timestamp: Timestamp,
    /// Severity.
    pub level: Severity,
    /// Grouping such as `authentication`.
    pub category: String,
    /// Operation name.
    pub action: String,
    /// Who performed the action.
    pub actor: Option<String>,
    /// Sanitized or sealed details.
    pub details: Payload,
    /// Transport context.
    pub metadata: EntryMetadata,
    /// Sequence of an earlier entry this one corrects or erases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<u64>,
}

impl RawEntry {
    pub(crate) fn hash_input(&self) -> HashInput<'_> {
        HashInput {
            id: &self.id,
            timestamp: &self.timestamp,
            level: self.level,
            category: &self.category,
            action: &self.action,
            actor: self.actor.as_deref(),
            details: &self.details,
            metadata: &self.metadata,
            references: self.references,
        }
    }
}

/// A chained, signed audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// Creation time, never earlier than the predecessor's.
    pub timestamp: Timestamp,
    /// Severity.
    pub level: Severity,
    /// Grouping such as `authentication`.
    pub category: String,
    /// Operation name.
    pub action: String,
    /// Who performed the action.
    pub actor: Option<String>,
    /// Sanitized or sealed details.
    pub details: Payload,
    /// Transport context.
    pub metadata: EntryMetadata,
    /// Sequence of an earlier entry this one corrects or erases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<u64>,
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// Content hash of the predecessor, or genesis.
    pub previous_hash: ContentHash,
    /// Hash over every field above.
    pub content_hash: ContentHash,
    /// Version of the key that signed `content_hash`.
    pub key_version: KeyVersion,
    /// Signature over `content_hash`.
    pub signature: Signature,
}

impl AuditEntry {
    pub(crate) fn hash_input(&self) -> HashInput<'_> {
        HashInput {
            id: &self.id,
            timestamp: &self.timestamp,
            level: self.level,
            category: &self.category,
            action: &self.action,
            actor: self.actor.as_deref(),
            details: &self.details,
            metadata: &self.metadata,
            references: self.references,
        }
    }

    /// Recompute the content hash from the entry's fields.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        self.hash_input().digest(&self.previous_hash, self.sequence)
    }

    /// Whether the stored content hash matches the fields.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.content_hash
    }

    /// Verify the signature over the stored content hash.
    ///
    /// This is the check [`IntegrityVerifier`](crate::IntegrityVerifier)
    /// runs. Fields altered behind an untouched hash are caught by
    /// [`AuditEntry::verify_hash`] instead; a hash recomputed after
    /// alteration fails here.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Signature`] if the key version is unknown or the
    /// signature does not match.
    pub fn verify_signature(&self, keys: &KeyRing) -> AuditResult<()> {
        keys.verify(self.key_version, self.content_hash.as_bytes(), &self.signature)
            .map_err(|e| AuditError::Signature {
                sequence: self.sequence,
                key_version: self.key_version,
                reason: e.to_string(),
            })
    }

    /// Whether this entry links directly onto `previous`.
    #[must_use]
    pub fn follows(&self, previous: &AuditEntry) -> bool {
        self.previous_hash == previous.content_hash && previous.sequence.checked_add(1) == Some(self.sequence)
    }

    /// Whether retention treats this entry as elevated.
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        self.level.requires_replication()
    }

    /// Serialize as one line of newline-delimited JSON, without the newline.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json_line(&self) -> AuditResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use vigil_crypto::{KeyPair, SigningIdentity};

    use super::*;
    use crate::chain::{ChainState, chain};
    use crate::value::{Details, Value};

    fn raw(action: &str) -> RawEntry {
        let mut details = Details::new();
        details.insert("path".into(), Value::from("/etc/passwd"));
        RawEntry {
            id: EntryId::new(),
            timestamp: Timestamp::now(),
            level: Severity::Info,
            category: "file".into(),
            action: action.into(),
            actor: Some("alice".into()),
            details: Payload::Clear(details),
            metadata: EntryMetadata::default(),
            references: None,
        }
    }

    fn ring_for(identity: &SigningIdentity) -> KeyRing {
        let mut ring = KeyRing::new();
        ring.insert(identity.version(), identity.public_key()).unwrap();
        ring
    }

    #[test]
    fn test_fresh_entry_verifies() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let entry = chain(raw("read"), &mut state, &identity).unwrap();

        assert!(entry.verify_hash());
        entry.verify_signature(&ring_for(&identity)).unwrap();
    }

    #[test]
    fn test_altered_details_fail_hash() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let mut entry = chain(raw("read"), &mut state, &identity).unwrap();

        entry.details = Payload::empty();
        assert!(!entry.verify_hash());
        entry.verify_signature(&ring_for(&identity)).unwrap();
    }

    #[test]
    fn test_rehashed_forgery_fails_signature() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let mut entry = chain(raw("read"), &mut state, &identity).unwrap();

        entry.action = "delete".into();
        entry.content_hash = entry.compute_hash();
        assert!(entry.verify_hash());
        assert!(matches!(
            entry.verify_signature(&ring_for(&identity)),
            Err(AuditError::Signature { sequence: 1, .. })
        ));
    }

    #[test]
    fn test_signature_check_agrees_with_verifier() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let ring = ring_for(&identity);
        let verifier = crate::verify::IntegrityVerifier::new(ring.clone());
        let mut state = ChainState::genesis();
        let clean = chain(raw("read"), &mut state, &identity).unwrap();

        let mut altered = clean.clone();
        altered.details = Payload::empty();
        let mut rehashed = altered.clone();
        rehashed.content_hash = rehashed.compute_hash();

        for entry in [clean, altered, rehashed] {
            let flagged = !verifier.verify_entries(None, [&entry]).bad_signatures().is_empty();
            assert_eq!(entry.verify_signature(&ring).is_err(), flagged);
        }
    }

    #[test]
    fn test_unknown_key_version_fails() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion(2));
        let mut state = ChainState::genesis();
        let entry = chain(raw("read"), &mut state, &identity).unwrap();
        assert!(entry.verify_signature(&KeyRing::new()).is_err());
    }

    #[test]
    fn test_follows() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let first = chain(raw("a"), &mut state, &identity).unwrap();
        let second = chain(raw("b"), &mut state, &identity).unwrap();
        assert!(second.follows(&first));
        assert!(!first.follows(&second));
    }

    #[test]
    fn test_json_roundtrip_preserves_hash() {
        let identity = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let entry = chain(raw("read"), &mut state, &identity).unwrap();

        let line = entry.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let back: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
        assert!(back.verify_hash());
    }
}
