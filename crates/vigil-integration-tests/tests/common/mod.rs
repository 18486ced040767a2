//! Shared test harness for integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use vigil_audit::{
    AuditEntry, AuditError, AuditLogBuilder, AuditLog, AuditResult, CheckpointStore, ENTRIES_NAMESPACE,
    EmergencyLog, EntryStore, Journal, KvEntryStore, Reservations, entry_key,
};
use vigil_core::RetryPolicy;
use vigil_crypto::{KeyPair, KeyVersion, SigningIdentity};
use vigil_storage::{KvStore, MemoryKvStore, ScopedKvStore};

/// Independent copy of a key pair, so one key can sign across restarts.
#[allow(dead_code)]
pub fn copy_key(key: &KeyPair) -> KeyPair {
    KeyPair::from_base64_secret(&key.secret_key_base64()).expect("key round-trips")
}

/// Signing identity over a copy of `key`.
#[allow(dead_code)]
pub fn signer(key: &KeyPair, version: u32) -> SigningIdentity {
    SigningIdentity::new(copy_key(key), KeyVersion(version))
}

/// Entry store wrapper that can be switched offline.
#[allow(dead_code)]
pub struct FlakyStore {
    inner: Arc<dyn EntryStore>,
    offline: AtomicBool,
}

#[allow(dead_code)]
impl FlakyStore {
    /// Online wrapper around `inner`.
    pub fn new(inner: Arc<dyn EntryStore>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail, or succeed again.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> AuditResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AuditError::Persistence("primary store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntryStore for FlakyStore {
    async fn insert_batch(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        self.check()?;
        self.inner.insert_batch(entries).await
    }

    async fn get(&self, sequence: u64) -> AuditResult<Option<AuditEntry>> {
        self.check()?;
        self.inner.get(sequence).await
    }

    async fn range(&self, start: u64, end: u64) -> AuditResult<Vec<AuditEntry>> {
        self.check()?;
        self.inner.range(start, end).await
    }

    async fn latest(&self) -> AuditResult<Option<AuditEntry>> {
        self.check()?;
        self.inner.latest().await
    }

    async fn earliest(&self) -> AuditResult<Option<AuditEntry>> {
        self.check()?;
        self.inner.earliest().await
    }

    async fn remove_through(&self, through: u64) -> AuditResult<u64> {
        self.check()?;
        self.inner.remove_through(through).await
    }

    async fn count(&self) -> AuditResult<u64> {
        self.check()?;
        self.inner.count().await
    }
}

/// Durable state that outlives any one [`AuditLog`]: a shared key-value
/// backend for entries and checkpoints, plus journal, emergency and
/// reservation files.
#[allow(dead_code)]
pub struct Deployment {
    /// Backend holding entries and the checkpoint.
    pub kv: Arc<MemoryKvStore>,
    /// Tempdir holding the files.
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Deployment {
    /// Fresh, empty deployment.
    pub fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            dir: TempDir::new().expect("failed to create tempdir"),
        }
    }

    fn backend(&self) -> Arc<dyn KvStore> {
        self.kv.clone()
    }

    /// Hot entry store over the shared backend.
    pub fn hot(&self) -> Arc<KvEntryStore> {
        Arc::new(KvEntryStore::new(self.backend()).expect("entry namespace"))
    }

    /// Path of the emergency file.
    pub fn emergency_path(&self) -> PathBuf {
        self.dir.path().join("emergency.jsonl")
    }

    /// Journal directory.
    pub fn journal_dir(&self) -> PathBuf {
        self.dir.path().join("journal")
    }

    /// Path of the reservation mark.
    pub fn reservation_path(&self) -> PathBuf {
        self.dir.path().join("reservation.json")
    }

    /// Builder wired to this deployment, with `hot` as primary store.
    pub fn builder_with_hot(&self, signer: SigningIdentity, hot: Arc<dyn EntryStore>) -> AuditLogBuilder {
        AuditLog::builder(signer)
            .hot_store(hot)
            .checkpoints(CheckpointStore::new(self.backend()).expect("chain namespace"))
            .journal(Journal::new(self.journal_dir()))
            .emergency(Arc::new(EmergencyLog::file(self.emergency_path())))
            .reservations(Arc::new(Reservations::file(self.reservation_path())))
            .retry(RetryPolicy::no_retry())
    }

    /// Builder wired to this deployment.
    pub fn builder(&self, signer: SigningIdentity) -> AuditLogBuilder {
        self.builder_with_hot(signer, self.hot())
    }

    /// Overwrite a stored entry, bypassing the log.
    pub async fn overwrite(&self, entry: &AuditEntry) {
        let scoped = ScopedKvStore::new(self.backend(), ENTRIES_NAMESPACE).expect("entry namespace");
        scoped.set_json(&entry_key(entry.sequence), entry).await.expect("raw write");
    }

    /// Delete a stored entry, bypassing the log.
    pub async fn delete(&self, sequence: u64) {
        let scoped = ScopedKvStore::new(self.backend(), ENTRIES_NAMESPACE).expect("entry namespace");
        scoped.delete(&entry_key(sequence)).await.expect("raw delete");
    }

    /// Read a stored entry.
    pub async fn stored(&self, sequence: u64) -> AuditEntry {
        self.hot()
            .get(sequence)
            .await
            .expect("readable store")
            .expect("entry present")
    }
}
