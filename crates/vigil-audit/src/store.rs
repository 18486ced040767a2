//! Entry stores: the primary (hot) store and cold archive share one trait.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use vigil_storage::{KvStore, KvWrite, ScopedKvStore};

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};

/// Namespace holding one record per entry, keyed by [`entry_key`].
pub const ENTRIES_NAMESPACE: &str = "audit:entries";

/// Storage key for a sequence: zero-padded so lexical order is numeric order.
#[must_use]
pub fn entry_key(sequence: u64) -> String {
    format!("{sequence:020}")
}

fn parse_key(key: &str) -> Option<u64> {
    key.parse().ok()
}

/// Durable, sequence-indexed entry storage.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert a batch atomically. Re-inserting an identical entry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Persistence`] if a sequence already holds a
    /// different entry, or the backend rejects the write.
    async fn insert_batch(&self, entries: &[AuditEntry]) -> AuditResult<()>;

    /// Fetch one entry.
    async fn get(&self, sequence: u64) -> AuditResult<Option<AuditEntry>>;

    /// Entries with `start <= sequence <= end`, ascending.
    async fn range(&self, start: u64, end: u64) -> AuditResult<Vec<AuditEntry>>;

    /// The entry with the highest sequence.
    async fn latest(&self) -> AuditResult<Option<AuditEntry>>;

    /// The entry with the lowest sequence.
    async fn earliest(&self) -> AuditResult<Option<AuditEntry>>;

    /// Remove every entry with `sequence <= through`. Returns how many were removed.
    async fn remove_through(&self, through: u64) -> AuditResult<u64>;

    /// Number of stored entries.
    async fn count(&self) -> AuditResult<u64>;
}

fn conflict(existing: &AuditEntry) -> AuditError {
    AuditError::Persistence(format!(
        "sequence {} already holds a different entry ({})",
        existing.sequence,
        existing.content_hash.short()
    ))
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory entry store for tests and ephemeral chains.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: RwLock<BTreeMap<u64, AuditEntry>>,
}

impl MemoryEntryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn insert_batch(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        let mut map = self.entries.write().await;
        for entry in entries {
            if let Some(existing) = map.get(&entry.sequence) {
                if existing.content_hash != entry.content_hash {
                    return Err(conflict(existing));
                }
            }
        }
        for entry in entries {
            map.insert(entry.sequence, entry.clone());
        }
        Ok(())
    }

    async fn get(&self, sequence: u64) -> AuditResult<Option<AuditEntry>> {
        Ok(self.entries.read().await.get(&sequence).cloned())
    }

    async fn range(&self, start: u64, end: u64) -> AuditResult<Vec<AuditEntry>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.entries.read().await.range(start..=end).map(|(_, e)| e.clone()).collect())
    }

    async fn latest(&self) -> AuditResult<Option<AuditEntry>> {
        Ok(self.entries.read().await.values().next_back().cloned())
    }

    async fn earliest(&self) -> AuditResult<Option<AuditEntry>> {
        Ok(self.entries.read().await.values().next().cloned())
    }

    async fn remove_through(&self, through: u64) -> AuditResult<u64> {
        let mut map = self.entries.write().await;
        let keep = match through.checked_add(1) {
            Some(first_kept) => map.split_off(&first_kept),
            None => BTreeMap::new(),
        };
        let removed = u64::try_from(map.len()).unwrap_or(u64::MAX);
        *map = keep;
        Ok(removed)
    }

    async fn count(&self) -> AuditResult<u64> {
        Ok(u64::try_from(self.entries.read().await.len()).unwrap_or(u64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Key-value backed implementation
// ---------------------------------------------------------------------------

/// Entry store over any [`KvStore`], one JSON record per sequence.
#[derive(Debug, Clone)]
pub struct KvEntryStore {
    kv: ScopedKvStore,
}

impl KvEntryStore {
    /// Store entries in [`ENTRIES_NAMESPACE`] of `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is rejected by the backend.
    pub fn new(store: Arc<dyn KvStore>) -> AuditResult<Self> {
        Ok(Self {
            kv: ScopedKvStore::new(store, ENTRIES_NAMESPACE)?,
        })
    }

    async fn sequences(&self) -> AuditResult<Vec<u64>> {
        Ok(self.kv.list_keys().await?.iter().filter_map(|k| parse_key(k)).collect())
    }
}

#[async_trait]
impl EntryStore for KvEntryStore {
    async fn insert_batch(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        let mut writes = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(existing) = self.get(entry.sequence).await? {
                if existing.content_hash != entry.content_hash {
                    return Err(conflict(&existing));
                }
                continue;
            }
            writes.push(KvWrite::Put {
                key: entry_key(entry.sequence),
                value: serde_json::to_vec(entry)?,
            });
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.kv
            .write_batch(writes)
            .await
            .map_err(|e| AuditError::Persistence(e.to_string()))
    }

    async fn get(&self, sequence: u64) -> AuditResult<Option<AuditEntry>> {
        Ok(self.kv.get_json(&entry_key(sequence)).await?)
    }

    async fn range(&self, start: u64, end: u64) -> AuditResult<Vec<AuditEntry>> {
        let mut out = Vec::new();
        for sequence in self.sequences().await? {
            if sequence < start {
                continue;
            }
            if sequence > end {
                break;
            }
            if let Some(entry) = self.get(sequence).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn latest(&self) -> AuditResult<Option<AuditEntry>> {
        match self.sequences().await?.last() {
            Some(&sequence) => self.get(sequence).await,
            None => Ok(None),
        }
    }

    async fn earliest(&self) -> AuditResult<Option<AuditEntry>> {
        match self.sequences().await?.first() {
            Some(&sequence) => self.get(sequence).await,
            None => Ok(None),
        }
    }

    async fn remove_through(&self, through: u64) -> AuditResult<u64> {
        let writes: Vec<KvWrite> = self
            .sequences()
            .await?
            .into_iter()
            .take_while(|s| *s <= through)
            .map(|s| KvWrite::Delete { key: entry_key(s) })
            .collect();
        let removed = u64::try_from(writes.len()).unwrap_or(u64::MAX);
        if removed > 0 {
            self.kv.write_batch(writes).await?;
        }
        Ok(removed)
    }

    async fn count(&self) -> AuditResult<u64> {
        Ok(u64::try_from(self.sequences().await?.len()).unwrap_or(u64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Hot + cold reads
// ---------------------------------------------------------------------------

/// Entries in `start..=end` from cold then hot storage, deduplicated by
/// sequence and in ascending order. Hot wins when both hold a sequence.
///
/// # Errors
///
/// Returns the first backend error.
pub async fn read_merged(
    hot: &dyn EntryStore,
    cold: Option<&dyn EntryStore>,
    start: u64,
    end: u64,
) -> AuditResult<Vec<AuditEntry>> {
    let mut merged = BTreeMap::new();
    if let Some(cold) = cold {
        for entry in cold.range(start, end).await? {
            merged.insert(entry.sequence, entry);
        }
    }
    for entry in hot.range(start, end).await? {
        merged.insert(entry.sequence, entry);
    }
    Ok(merged.into_values().collect())
}

/// Lowest and highest stored sequence across both stores.
///
/// # Errors
///
/// Returns the first backend error.
pub async fn merged_bounds(hot: &dyn EntryStore, cold: Option<&dyn EntryStore>) -> AuditResult<Option<(u64, u64)>> {
    let mut low: Option<u64> = None;
    let mut high: Option<u64> = None;
    let mut stores: Vec<&dyn EntryStore> = vec![hot];
    stores.extend(cold);
    for store in stores {
        if let Some(first) = store.earliest().await? {
            low = Some(low.map_or(first.sequence, |l| l.min(first.sequence)));
        }
        if let Some(last) = store.latest().await? {
            high = Some(high.map_or(last.sequence, |h| h.max(last.sequence)));
        }
    }
    Ok(low.zip(high))
}

/// Newest entry in hot storage, falling back to cold.
///
/// # Errors
///
/// Returns the first backend error.
pub async fn latest_anywhere(hot: &dyn EntryStore, cold: Option<&dyn EntryStore>) -> AuditResult<Option<AuditEntry>> {
    if let Some(entry) = hot.latest().await? {
        return Ok(Some(entry));
    }
    match cold {
        Some(cold) => cold.latest().await,
        None => Ok(None),
    }
}

/// Fetch one entry from hot storage, falling back to cold.
///
/// # Errors
///
/// Returns the first backend error.
pub async fn get_anywhere(
    hot: &dyn EntryStore,
    cold: Option<&dyn EntryStore>,
    sequence: u64,
) -> AuditResult<Option<AuditEntry>> {
    if let Some(entry) = hot.get(sequence).await? {
        return Ok(Some(entry));
    }
    match cold {
        Some(cold) => cold.get(sequence).await,
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use vigil_core::{EntryId, Severity, Timestamp};
    use vigil_crypto::{KeyPair, KeyVersion, SigningIdentity};
    use vigil_storage::MemoryKvStore;

    use super::*;
    use crate::chain::{ChainState, chain};
    use crate::entry::RawEntry;
    use crate::value::{EntryMetadata, Payload};

    pub(crate) fn make_chain(count: usize) -> Vec<AuditEntry> {
        let signer = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        (0..count)
            .map(|i| {
                let raw = RawEntry {
                    id: EntryId::new(),
                    timestamp: Timestamp::now(),
                    level: Severity::Info,
                    category: "test".into(),
                    action: format!("op-{i}"),
                    actor: None,
                    details: Payload::empty(),
                    metadata: EntryMetadata::default(),
                    references: None,
                };
                chain(raw, &mut state, &signer).unwrap()
            })
            .collect()
    }

    fn stores() -> Vec<Box<dyn EntryStore>> {
        vec![
            Box::new(MemoryEntryStore::new()),
            Box::new(KvEntryStore::new(Arc::new(MemoryKvStore::new())).unwrap()),
        ]
    }

    #[test]
    fn test_entry_key_orders_numerically() {
        assert!(entry_key(9) < entry_key(10));
        assert_eq!(parse_key(&entry_key(42)), Some(42));
    }

    #[tokio::test]
    async fn test_insert_range_latest() {
        let entries = make_chain(5);
        for store in stores() {
            store.insert_batch(&entries).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 5);
            let mid = store.range(2, 4).await.unwrap();
            assert_eq!(mid.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3, 4]);
            assert_eq!(store.latest().await.unwrap().unwrap().sequence, 5);
            assert_eq!(store.earliest().await.unwrap().unwrap().sequence, 1);
        }
    }

    #[tokio::test]
    async fn test_reinsert_identical_is_noop() {
        let entries = make_chain(3);
        for store in stores() {
            store.insert_batch(&entries).await.unwrap();
            store.insert_batch(&entries).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn test_conflicting_insert_rejected_atomically() {
        let first = make_chain(2);
        let other = make_chain(3);
        for store in stores() {
            store.insert_batch(&first).await.unwrap();
            let err = store.insert_batch(&other).await.unwrap_err();
            assert!(matches!(err, AuditError::Persistence(_)));
            // Sequence 3 from the rejected batch must not have landed.
            assert!(store.get(3).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_remove_through() {
        let entries = make_chain(6);
        for store in stores() {
            store.insert_batch(&entries).await.unwrap();
            assert_eq!(store.remove_through(4).await.unwrap(), 4);
            assert_eq!(store.earliest().await.unwrap().unwrap().sequence, 5);
        }
    }

    #[tokio::test]
    async fn test_read_merged_prefers_hot_and_orders() {
        let entries = make_chain(6);
        let hot = MemoryEntryStore::new();
        let cold = MemoryEntryStore::new();
        cold.insert_batch(&entries[..4]).await.unwrap();
        hot.insert_batch(&entries[3..]).await.unwrap();

        let merged = read_merged(&hot, Some(&cold), 1, 6).await.unwrap();
        assert_eq!(merged.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(merged_bounds(&hot, Some(&cold)).await.unwrap(), Some((1, 6)));
        assert_eq!(get_anywhere(&hot, Some(&cold), 2).await.unwrap().unwrap().sequence, 2);
    }
}
