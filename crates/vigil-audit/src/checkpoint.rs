//! Fast-restart checkpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_crypto::{ContentHash, KeyVersion};
use vigil_storage::{KvStore, ScopedKvStore};

use crate::chain::ChainState;
use crate::error::AuditResult;

/// Namespace for chain bookkeeping.
pub const CHAIN_NAMESPACE: &str = "audit:chain";
const CHECKPOINT_KEY: &str = "checkpoint";

/// Chain position after the last confirmed flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Content hash of the last persisted entry.
    pub last_hash: ContentHash,
    /// Sequence of the last persisted entry.
    pub last_sequence: u64,
    /// Highest sequence handed out by the sequencer when this was written.
    pub reserved_through: u64,
    /// Signing key active at the time.
    pub key_version: KeyVersion,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint at `persisted`, with `reserved_through` sequences handed out.
    #[must_use]
    pub fn new(persisted: ChainState, reserved_through: u64, key_version: KeyVersion) -> Self {
        Self {
            last_hash: persisted.last_hash,
            last_sequence: persisted.last_sequence,
            reserved_through: reserved_through.max(persisted.last_sequence),
            key_version,
            written_at: Utc::now(),
        }
    }
}

/// Reads and rewrites the single checkpoint record.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    kv: ScopedKvStore,
}

impl CheckpointStore {
    /// Checkpoint store in [`CHAIN_NAMESPACE`] of `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is rejected by the backend.
    pub fn new(store: Arc<dyn KvStore>) -> AuditResult<Self> {
        Ok(Self {
            kv: ScopedKvStore::new(store, CHAIN_NAMESPACE)?,
        })
    }

    /// The stored checkpoint, if one was ever written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub async fn load(&self) -> AuditResult<Option<Checkpoint>> {
        Ok(self.kv.get_json(CHECKPOINT_KEY).await?)
    }

    /// Replace the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    pub async fn save(&self, checkpoint: &Checkpoint) -> AuditResult<()> {
        Ok(self.kv.set_json(CHECKPOINT_KEY, checkpoint).await?)
    }
}

#[cfg(test)]
mod tests {
    use vigil_storage::MemoryKvStore;

    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = CheckpointStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        assert!(store.load().await.unwrap().is_none());

        let state = ChainState {
            last_hash: ContentHash::hash(b"head"),
            last_sequence: 7,
            last_timestamp: None,
        };
        let checkpoint = Checkpoint::new(state, 9, KeyVersion::INITIAL);
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(checkpoint));
    }

    #[test]
    fn test_reserved_never_below_persisted() {
        let state = ChainState {
            last_sequence: 5,
            ..ChainState::genesis()
        };
        assert_eq!(Checkpoint::new(state, 3, KeyVersion::INITIAL).reserved_through, 5);
    }
}
