//! The audit log facade.
//!
//! Two ingestion tiers:
//!
//! - [`AuditLog::log_event`] is synchronous and never fails. Entries are
//!   chained and buffered; anything that goes wrong lands in the emergency
//!   file instead of reaching the caller.
//! - [`AuditLog::log_critical`] returns only after the entry has been
//!   replicated to the configured quorum, and surfaces a failure so the caller
//!   can decide whether to proceed.
//!
//! `critical` and `security` are the blocking levels; [`AuditLog::log`]
//! dispatches by level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use vigil_config::Config;
use vigil_core::RetryPolicy;
use vigil_crypto::{KeyPair, KeyRing, KeyVersion, PublicKey, SealingKey, SigningIdentity};
use vigil_storage::{FileKvStore, KvStore};

use crate::alert::{Alert, AlertKind, Alerter};
use crate::archive::{ArchiveReport, Archiver, RetentionPolicy};
use crate::builder::{AuditEvent, EntryBuilder};
use crate::chain::ChainState;
use crate::checkpoint::CheckpointStore;
use crate::emergency::{EmergencyLog, EmergencyRecord};
use crate::entry::{AuditEntry, RawEntry};
use crate::error::{AuditError, AuditResult};
use crate::export::{ExportBundle, ExportFilter, ExportFormat, Exporter};
use crate::journal::Journal;
use crate::recovery::recover;
use crate::replicator::{FileReplica, ReplicaSink, Replicator};
use crate::reservation::Reservations;
use crate::sanitize::Sanitizer;
use crate::sequencer::Sequencer;
use crate::store::{EntryStore, KvEntryStore, MemoryEntryStore};
use crate::verify::{IntegrityVerifier, VerificationReport};
use crate::writer::{FlushReport, PersistenceWriter};

/// Category of signing key lifecycle entries.
pub const KEYS_CATEGORY: &str = "audit.keys";
/// Category of mandated erasure entries.
pub const ERASURE_CATEGORY: &str = "audit.erasure";

/// What happened to a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Chained and buffered for the next flush.
    Queued {
        /// Assigned sequence.
        sequence: u64,
    },
    /// Chained, buffered and replicated to the quorum.
    Replicated {
        /// Assigned sequence.
        sequence: u64,
    },
    /// Could not be chained; preserved in the emergency file.
    Deferred,
}

impl Ingested {
    /// Assigned sequence, if the event was chained.
    #[must_use]
    pub fn sequence(self) -> Option<u64> {
        match self {
            Self::Queued { sequence } | Self::Replicated { sequence } => Some(sequence),
            Self::Deferred => None,
        }
    }
}

/// Timing for the background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Maximum time an entry waits in the buffer.
    pub flush_interval: Duration,
    /// Bound on the final flush at shutdown.
    pub shutdown_grace: Duration,
    /// Period of the background verification, `None` to disable it.
    pub verify_interval: Option<Duration>,
    /// Most recent entries covered by each background verification.
    pub verify_window: u64,
    /// Period of the archive pass.
    pub archive_interval: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(1000),
            shutdown_grace: Duration::from_millis(5000),
            verify_interval: Some(Duration::from_secs(300)),
            verify_window: 10_000,
            archive_interval: Duration::from_secs(3600),
        }
    }
}

struct Inner {
    builder: EntryBuilder,
    sequencer: Sequencer,
    writer: PersistenceWriter,
    replicator: Option<Replicator>,
    archiver: Option<Archiver>,
    keys: RwLock<KeyRing>,
    hot: Arc<dyn EntryStore>,
    cold: Option<Arc<dyn EntryStore>>,
    journal: Option<Journal>,
    alerts: Alerter,
    schedule: Schedule,
    flush_lock: tokio::sync::Mutex<()>,
    rotation_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

/// Tamper-evident audit log. Cheap to clone; clones share one chain.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("sequencer", &self.inner.sequencer)
            .field("replicator", &self.inner.replicator)
            .field("schedule", &self.inner.schedule)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Start building a log that signs with `signer`.
    #[must_use]
    pub fn builder(signer: SigningIdentity) -> AuditLogBuilder {
        AuditLogBuilder::new(signer)
    }

    /// Open the log described by `config`, recovering any existing chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Configuration`] if the signing key is missing
    /// outside development, any key material is malformed, or the chain
    /// state cannot be recovered.
    pub async fn from_config(config: &Config) -> AuditResult<Self> {
        AuditLogBuilder::from_config(config)?.build().await
    }

    // -----------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------

    /// Chain and buffer `event` without waiting for I/O.
    ///
    /// Never fails. Elevated events are also replicated in the background
    /// when called inside a runtime; use [`AuditLog::log_critical`] to wait
    /// for that.
    pub fn log_event(&self, event: AuditEvent) -> Ingested {
        let raw = self.inner.builder.build(event);
        if self.inner.shut_down.load(Ordering::Acquire) {
            self.defer(raw, &AuditError::ShutDown);
            return Ingested::Deferred;
        }
        match self.inner.sequencer.append(raw.clone()) {
            Ok(entry) => {
                let sequence = entry.sequence;
                if entry.is_elevated() {
                    self.replicate_in_background(entry);
                }
                Ingested::Queued { sequence }
            },
            Err(e) => {
                self.defer(raw, &e);
                Ingested::Deferred
            },
        }
    }

    /// Chain `event` and wait until it is replicated to the quorum.
    ///
    /// The entry is chained and persisted with the next flush even when
    /// replication fails.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Replication`] if the quorum was not reached,
    /// [`AuditError::ShutDown`] after shutdown, or a chaining error.
    pub async fn log_critical(&self, event: AuditEvent) -> AuditResult<AuditEntry> {
        let raw = self.inner.builder.build(event);
        self.commit_critical(raw).await
    }

    /// Dispatch by level: blocking for `critical`/`security`, queued otherwise.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::log_critical`]. Lower levels never fail.
    pub async fn log(&self, event: AuditEvent) -> AuditResult<Ingested> {
        if event.level.requires_replication() {
            let entry = self.log_critical(event).await?;
            Ok(Ingested::Replicated {
                sequence: entry.sequence,
            })
        } else {
            Ok(self.log_event(event))
        }
    }

    /// Append an entry correcting the one at `original`.
    ///
    /// The original entry is untouched; the correction points back at it.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidReference`] if `original` was never
    /// assigned, or any error from [`AuditLog::log`].
    pub async fn record_correction(&self, original: u64, event: AuditEvent) -> AuditResult<Ingested> {
        self.check_reference(original)?;
        self.log(event.references(original)).await
    }

    /// Record a mandated erasure of the entry at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidReference`] if `target` was never
    /// assigned, or any error from [`AuditLog::log_critical`].
    pub async fn record_tombstone(
        &self,
        target: u64,
        legal_basis: impl Into<String>,
        actor: impl Into<String>,
    ) -> AuditResult<AuditEntry> {
        self.check_reference(target)?;
        let event = AuditEvent::security(ERASURE_CATEGORY, "tombstone")
            .actor(actor)
            .references(target)
            .detail("legal_basis", legal_basis.into());
        self.commit_critical(self.inner.builder.build_trusted(event)).await
    }

    /// Replace the signing key.
    ///
    /// A critical `audit.keys` entry naming both keys is signed by the
    /// outgoing key and replicated; every later entry is signed by
    /// `new_key` under the next key version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version space is exhausted, or
    /// [`AuditError::Replication`] if the rotation record missed its quorum.
    /// The rotation itself has taken effect in that case.
    pub async fn rotate_signing_key(&self, new_key: KeyPair, actor: impl Into<String>) -> AuditResult<AuditEntry> {
        let _rotation = self.inner.rotation_lock.lock().await;
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(AuditError::ShutDown);
        }
        let old_version = self.inner.sequencer.key_version();
        let old_public = self.inner.sequencer.public_key();
        let new_version = old_version.next()?;
        let new_public = new_key.public_key();
        self.inner
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(new_version, new_public)?;

        let event = AuditEvent::critical(KEYS_CATEGORY, "rotate")
            .actor(actor)
            .detail("old_key_version", old_version.0)
            .detail("old_key_id", old_public.key_id_hex())
            .detail("new_key_version", new_version.0)
            .detail("new_key_id", new_public.key_id_hex());
        let raw = self.inner.builder.build_trusted(event);
        let entry = self
            .inner
            .sequencer
            .rotate(raw, SigningIdentity::new(new_key, new_version))?;
        self.replicate(&entry).await?;
        Ok(entry)
    }

    async fn commit_critical(&self, raw: RawEntry) -> AuditResult<AuditEntry> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            self.defer(raw, &AuditError::ShutDown);
            return Err(AuditError::ShutDown);
        }
        let entry = match self.inner.sequencer.append(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                self.defer(raw, &e);
                return Err(e);
            },
        };
        self.replicate(&entry).await?;
        Ok(entry)
    }

    async fn replicate(&self, entry: &AuditEntry) -> AuditResult<()> {
        match &self.inner.replicator {
            Some(replicator) => replicator.replicate(entry).await.map(|_| ()),
            None => Ok(()),
        }
    }

    fn replicate_in_background(&self, entry: AuditEntry) {
        let Some(replicator) = self.inner.replicator.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Failures are alerted by the replicator.
                    let _ = replicator.replicate(&entry).await;
                });
            },
            Err(_) => warn!(
                sequence = entry.sequence,
                "no runtime for background replication; entry relies on the next flush"
            ),
        }
    }

    fn defer(&self, raw: RawEntry, cause: &AuditError) {
        warn!(error = %cause, category = %raw.category, action = %raw.action, "audit event deferred");
        let record = EmergencyRecord::Unsequenced {
            entry: raw,
            error: cause.to_string(),
        };
        if let Err(e) = self.inner.writer.emergency().append(&[record]) {
            error!(error = %e, "audit event lost: emergency log unavailable");
            self.inner.alerts.raise(Alert::new(
                AlertKind::PersistenceFailed,
                format!("audit event could not be chained ({cause}) or preserved ({e})"),
            ));
        }
    }

    fn check_reference(&self, sequence: u64) -> AuditResult<()> {
        if sequence == 0 || sequence > self.inner.sequencer.state().last_sequence {
            return Err(AuditError::InvalidReference(sequence));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Drain the buffer and write it to every durable sink.
    ///
    /// New entries keep buffering while a flush is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Persistence`] if no durable sink confirmed the
    /// batch; the entries are retried on the next flush.
    pub async fn flush(&self) -> AuditResult<FlushReport> {
        let _flush = self.inner.flush_lock.lock().await;
        let batch = self.inner.sequencer.drain();
        let reserved = self.inner.sequencer.state().last_sequence;
        let key_version = self.inner.sequencer.key_version();
        let result = self.inner.writer.flush(batch, reserved, key_version).await;
        self.settle_reservations();
        result
    }

    /// Entries a failed flush left waiting for the primary store.
    pub async fn backlog_len(&self) -> usize {
        self.inner.writer.backlog_len().await
    }

    fn settle_reservations(&self) {
        if let Err(e) = self.inner.sequencer.settle() {
            warn!(error = %e, "could not lower the reservation mark");
        }
    }

    /// Stop accepting entries and flush what is buffered.
    ///
    /// The final flush is bounded by the shutdown grace period; whatever it
    /// cannot write in time goes to the emergency file. Calling this twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only if the remaining entries could be written
    /// neither by the flush nor to the emergency file.
    pub async fn shutdown(&self) -> AuditResult<FlushReport> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(FlushReport::default());
        }
        let grace = self.inner.schedule.shutdown_grace;
        let flush_guard = tokio::time::timeout(grace, self.inner.flush_lock.lock()).await;
        let batch = self.inner.sequencer.drain();
        self.settle_reservations();
        if batch.is_empty() && self.inner.writer.backlog_len().await == 0 {
            info!("audit log shut down; nothing to flush");
            return Ok(FlushReport::default());
        }
        let count = batch.len();

        let final_flush = match flush_guard {
            Ok(_guard) => {
                let inner = Arc::clone(&self.inner);
                let copy = batch.clone();
                let reserved = self.inner.sequencer.state().last_sequence;
                let key_version = self.inner.sequencer.key_version();
                let task = tokio::spawn(async move { inner.writer.flush(copy, reserved, key_version).await });
                match tokio::time::timeout(grace, task).await {
                    Ok(Ok(result)) => Some(result),
                    Ok(Err(join)) => Some(Err(AuditError::Persistence(format!("final flush aborted: {join}")))),
                    Err(_) => None,
                }
            },
            Err(_) => None,
        };

        match final_flush {
            Some(Ok(report)) => {
                info!(flushed = report.flushed, "audit log shut down");
                Ok(report)
            },
            outcome => {
                if let Some(Err(e)) = &outcome {
                    warn!(error = %e, "final flush failed");
                } else {
                    warn!(grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX), "final flush exceeded grace period");
                }
                self.inner.writer.emergency().append_entries(&batch)?;
                self.inner.alerts.raise(Alert::new(
                    AlertKind::PersistenceDegraded,
                    format!("{count} entries written to the emergency log at shutdown"),
                ));
                Ok(FlushReport {
                    flushed: count,
                    emergency: true,
                    ..FlushReport::default()
                })
            },
        }
    }

    // -----------------------------------------------------------------
    // Verification, export, retention
    // -----------------------------------------------------------------

    /// Verify persisted entries in `start..=end` across hot and cold storage.
    ///
    /// Without `end`, the range runs to the newest persisted entry, so a
    /// deleted tail is reported. Any finding raises an integrity alert.
    /// Nothing is repaired.
    ///
    /// # Errors
    ///
    /// Returns an error only if storage cannot be read.
    pub async fn verify_integrity(&self, start: Option<u64>, end: Option<u64>) -> AuditResult<VerificationReport> {
        let verifier = IntegrityVerifier::new(self.key_ring());
        let report = verifier
            .verify_range(
                self.inner.hot.as_ref(),
                self.inner.cold.as_deref(),
                start,
                end,
                Some(self.inner.writer.persisted().last_sequence),
            )
            .await?;
        if let Some(first) = report.issues.first() {
            self.inner.alerts.raise(
                Alert::new(
                    AlertKind::IntegrityViolation,
                    format!("verification found {} integrity issues", report.issues.len()),
                )
                .at_sequence(first.sequence()),
            );
        }
        Ok(report)
    }

    /// Verify the most recent `window` persisted entries.
    ///
    /// # Errors
    ///
    /// See [`AuditLog::verify_integrity`].
    pub async fn verify_recent(&self, window: u64) -> AuditResult<VerificationReport> {
        let last = self.inner.writer.persisted().last_sequence;
        let start = last.saturating_sub(window.saturating_sub(1)).max(1);
        self.verify_integrity(Some(start), Some(last)).await
    }

    /// Export persisted entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Export`] if the range cannot be produced in full.
    pub async fn export(&self, filter: &ExportFilter, format: ExportFormat) -> AuditResult<ExportBundle> {
        Exporter::new(Arc::clone(&self.inner.hot), self.inner.cold.clone())
            .export(filter, format)
            .await
    }

    /// Run one archive pass at `now` and seal completed journal days.
    ///
    /// # Errors
    ///
    /// Returns any archiver error; nothing is removed from the hot store then.
    pub async fn archive(&self, now: DateTime<Utc>) -> AuditResult<ArchiveReport> {
        if let Some(journal) = &self.inner.journal {
            if let Err(e) = journal.seal_completed_days(now.date_naive()) {
                warn!(error = %e, "could not seal completed journal files");
            }
        }
        match &self.inner.archiver {
            Some(archiver) => archiver.run_once(now).await,
            None => Ok(ArchiveReport::default()),
        }
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Chain head, including buffered entries.
    #[must_use]
    pub fn chain_state(&self) -> ChainState {
        self.inner.sequencer.state()
    }

    /// Newest entry confirmed by the primary store.
    #[must_use]
    pub fn persisted_state(&self) -> ChainState {
        self.inner.writer.persisted()
    }

    /// Public keys for every signing era.
    #[must_use]
    pub fn key_ring(&self) -> KeyRing {
        self.inner.keys.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Version of the active signing key.
    #[must_use]
    pub fn key_version(&self) -> KeyVersion {
        self.inner.sequencer.key_version()
    }

    /// Public half of the active signing key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.inner.sequencer.public_key()
    }

    /// Entries waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.sequencer.buffered()
    }

    /// Resolves when the buffer is full or an elevated entry arrives.
    pub async fn batch_ready(&self) {
        self.inner.sequencer.batch_ready().await;
    }

    /// Background job timing.
    #[must_use]
    pub fn schedule(&self) -> Schedule {
        self.inner.schedule
    }

    /// Whether an archiver is configured.
    #[must_use]
    pub fn has_archiver(&self) -> bool {
        self.inner.archiver.is_some()
    }

    /// Whether [`AuditLog::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

/// Assembles an [`AuditLog`].
pub struct AuditLogBuilder {
    signer: SigningIdentity,
    trusted: KeyRing,
    hot: Arc<dyn EntryStore>,
    cold: Option<Arc<dyn EntryStore>>,
    checkpoints: Option<CheckpointStore>,
    reservations: Option<Arc<Reservations>>,
    journal: Option<Journal>,
    emergency: Option<Arc<EmergencyLog>>,
    replicas: Vec<Arc<dyn ReplicaSink>>,
    min_acks: usize,
    replication_timeout: Duration,
    retry: RetryPolicy,
    batch_size: usize,
    schedule: Schedule,
    retention: RetentionPolicy,
    archive_batch_limit: u64,
    sealing_key: Option<Arc<SealingKey>>,
    seal_threshold: Option<usize>,
    sanitizer: Sanitizer,
    alerts: Alerter,
}

impl std::fmt::Debug for AuditLogBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogBuilder")
            .field("key_version", &self.signer.version())
            .field("batch_size", &self.batch_size)
            .field("replicas", &self.replicas.len())
            .field("min_acks", &self.min_acks)
            .finish_non_exhaustive()
    }
}

impl AuditLogBuilder {
    /// Builder with in-memory storage and no replicas.
    #[must_use]
    pub fn new(signer: SigningIdentity) -> Self {
        Self {
            signer,
            trusted: KeyRing::new(),
            hot: Arc::new(MemoryEntryStore::new()),
            cold: None,
            checkpoints: None,
            reservations: None,
            journal: None,
            emergency: None,
            replicas: Vec::new(),
            min_acks: 1,
            replication_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            batch_size: 256,
            schedule: Schedule::default(),
            retention: RetentionPolicy::default(),
            archive_batch_limit: 1000,
            sealing_key: None,
            seal_threshold: None,
            sanitizer: Sanitizer::new(),
            alerts: Alerter::new(),
        }
    }

    /// Builder wired to the on-disk layout and keys in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Configuration`] for missing or malformed keys,
    /// or a storage error if a store cannot be opened.
    pub fn from_config(config: &Config) -> AuditResult<Self> {
        let keypair = match config.require_signing_key()? {
            Some(secret) => KeyPair::from_base64_secret(secret.expose())
                .map_err(|e| AuditError::Configuration(format!("malformed signing key: {e}")))?,
            None => {
                let keypair = KeyPair::generate();
                warn!(
                    key_id = %keypair.key_id_hex(),
                    "development environment: signing with an ephemeral key"
                );
                keypair
            },
        };
        let signer = SigningIdentity::new(keypair, KeyVersion(config.signing.key_version));

        let mut trusted = KeyRing::new();
        for key in &config.signing.trusted_keys {
            let public = PublicKey::from_base64(&key.public_key).map_err(|e| {
                AuditError::Configuration(format!("trusted key version {} is malformed: {e}", key.version))
            })?;
            trusted.insert(KeyVersion(key.version), public)?;
        }

        let sealing_key = config
            .secrets
            .sealing_key
            .as_ref()
            .map(|secret| SealingKey::from_base64(secret.expose()))
            .transpose()
            .map_err(|e| AuditError::Configuration(format!("malformed sealing key: {e}")))?
            .map(Arc::new);

        let paths = config.paths();
        let hot_kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open(&paths.hot_dir)?);
        let cold_kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open(&paths.cold_dir)?);
        let retry = &config.persistence.retry;

        let mut builder = Self::new(signer)
            .trusted_keys(trusted)
            .hot_store(Arc::new(KvEntryStore::new(Arc::clone(&hot_kv))?))
            .cold_store(Arc::new(KvEntryStore::new(cold_kv)?))
            .checkpoints(CheckpointStore::new(hot_kv)?)
            .reservations(Arc::new(Reservations::file(&paths.reservation_path)))
            .journal(Journal::new(&paths.journal_dir))
            .emergency(Arc::new(EmergencyLog::file(&paths.emergency_path)))
            .replica(Arc::new(FileReplica::new("forensic", &paths.forensic_path)))
            .min_acks(config.replication.min_acks)
            .replication_timeout(Duration::from_millis(config.replication.timeout_ms))
            .retry(RetryPolicy::new(
                retry.max_attempts,
                Duration::from_millis(retry.initial_delay_ms),
                Duration::from_millis(retry.max_delay_ms),
                retry.multiplier,
            ))
            .batch_size(config.buffer.batch_size)
            .schedule(Schedule {
                flush_interval: Duration::from_millis(config.buffer.flush_interval_ms),
                shutdown_grace: Duration::from_millis(config.buffer.shutdown_grace_ms),
                verify_interval: (config.verification.interval_secs > 0)
                    .then(|| Duration::from_secs(config.verification.interval_secs)),
                verify_window: config.verification.window,
                archive_interval: Duration::from_secs(config.retention.archive_interval_secs),
            })
            .retention(
                RetentionPolicy::from_days(config.retention.standard_days, config.retention.elevated_days),
                u64::try_from(config.retention.archive_batch_limit).unwrap_or(u64::MAX),
            )
            .seal_threshold(config.sealing.threshold_bytes);
        if let Some(key) = sealing_key {
            builder = builder.sealing_key(key);
        }
        Ok(builder)
    }

    /// Public keys of earlier signing eras.
    #[must_use]
    pub fn trusted_keys(mut self, keys: KeyRing) -> Self {
        self.trusted = keys;
        self
    }

    /// Primary (hot) store.
    #[must_use]
    pub fn hot_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.hot = store;
        self
    }

    /// Cold archive store. Enables the archiver.
    #[must_use]
    pub fn cold_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.cold = Some(store);
        self
    }

    /// Checkpoint store.
    #[must_use]
    pub fn checkpoints(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Durable reservation mark. Defaults to an in-memory mark, which
    /// cannot detect sequences lost to a process crash.
    #[must_use]
    pub fn reservations(mut self, marks: Arc<Reservations>) -> Self {
        self.reservations = Some(marks);
        self
    }

    /// Daily journal.
    #[must_use]
    pub fn journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Emergency fallback. Defaults to an in-memory log.
    #[must_use]
    pub fn emergency(mut self, emergency: Arc<EmergencyLog>) -> Self {
        self.emergency = Some(emergency);
        self
    }

    /// Add a replica sink for critical entries.
    #[must_use]
    pub fn replica(mut self, sink: Arc<dyn ReplicaSink>) -> Self {
        self.replicas.push(sink);
        self
    }

    /// Acknowledgements a critical entry needs.
    #[must_use]
    pub fn min_acks(mut self, min_acks: usize) -> Self {
        self.min_acks = min_acks;
        self
    }

    /// Per-sink replication timeout.
    #[must_use]
    pub fn replication_timeout(mut self, timeout: Duration) -> Self {
        self.replication_timeout = timeout;
        self
    }

    /// Backoff for primary store writes.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Entries per flush.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Background job timing.
    #[must_use]
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Retention windows and archive batch size.
    #[must_use]
    pub fn retention(mut self, policy: RetentionPolicy, batch_limit: u64) -> Self {
        self.retention = policy;
        self.archive_batch_limit = batch_limit;
        self
    }

    /// Key for sealing confidential or oversized details.
    #[must_use]
    pub fn sealing_key(mut self, key: Arc<SealingKey>) -> Self {
        self.sealing_key = Some(key);
        self
    }

    /// Serialized size above which details are sealed.
    #[must_use]
    pub fn seal_threshold(mut self, bytes: usize) -> Self {
        self.seal_threshold = Some(bytes);
        self
    }

    /// Detail sanitizer.
    #[must_use]
    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Alert delivery.
    #[must_use]
    pub fn alerter(mut self, alerts: Alerter) -> Self {
        self.alerts = alerts;
        self
    }

    /// Recover the chain and open the log.
    ///
    /// If recovery finds reserved sequences that were never persisted, a
    /// security-level gap marker is appended after them and flushed before
    /// returning. The lost sequence numbers are never reused.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Configuration`] if the chain state cannot be
    /// recovered, the signing key is older than the chain's, or the
    /// replication quorum cannot be met.
    pub async fn build(self) -> AuditResult<AuditLog> {
        let emergency = self.emergency.unwrap_or_else(|| Arc::new(EmergencyLog::in_memory()));
        let reservations = self.reservations.unwrap_or_else(|| Arc::new(Reservations::in_memory()));
        let report = recover(
            self.hot.as_ref(),
            self.cold.as_deref(),
            self.checkpoints.as_ref(),
            &emergency,
            Some(&reservations),
        )
        .await?;

        if let Some(cp) = &report.checkpoint {
            if cp.key_version > self.signer.version() {
                return Err(AuditError::Configuration(format!(
                    "signing key version {} is older than the chain's key version {}",
                    self.signer.version(),
                    cp.key_version
                )));
            }
        }

        let mut keys = self.trusted;
        keys.insert(self.signer.version(), self.signer.public_key())
            .map_err(|e| AuditError::Configuration(format!("active key conflicts with a trusted key: {e}")))?;

        let replicator = if self.replicas.is_empty() {
            None
        } else {
            Some(
                Replicator::new(self.replicas, self.min_acks, self.replication_timeout)?
                    .with_alerter(self.alerts.clone()),
            )
        };

        let mut writer = PersistenceWriter::new(Arc::clone(&self.hot), emergency)
            .with_retry(self.retry)
            .with_alerter(self.alerts.clone())
            .with_persisted(report.state);
        if let Some(journal) = &self.journal {
            writer = writer.with_journal(journal.clone());
        }
        if let Some(checkpoints) = self.checkpoints {
            writer = writer.with_checkpoints(checkpoints);
        }

        let archiver = self.cold.as_ref().map(|cold| {
            Archiver::new(
                Arc::clone(&self.hot),
                Arc::clone(cold),
                self.retention,
                self.archive_batch_limit,
            )
            .with_alerter(self.alerts.clone())
        });

        let mut builder = EntryBuilder::new().with_sanitizer(self.sanitizer);
        if let Some(key) = self.sealing_key {
            builder = builder.with_sealing_key(key);
        }
        if let Some(threshold) = self.seal_threshold {
            builder = builder.with_threshold(threshold);
        }

        // After a gap the chain resumes past the lost range, still linked to
        // the last persisted hash.
        let start = match report.gap {
            Some(gap) => ChainState {
                last_sequence: gap.through,
                ..report.state
            },
            None => report.state,
        };
        let sequencer = Sequencer::new(start, self.signer, self.batch_size)
            .with_reservations(reservations, report.reserved_through);

        let log = AuditLog {
            inner: Arc::new(Inner {
                builder,
                sequencer,
                writer,
                replicator,
                archiver,
                keys: RwLock::new(keys),
                hot: self.hot,
                cold: self.cold,
                journal: self.journal,
                alerts: self.alerts,
                schedule: self.schedule,
                flush_lock: tokio::sync::Mutex::new(()),
                rotation_lock: tokio::sync::Mutex::new(()),
                shut_down: AtomicBool::new(false),
            }),
        };

        if let Some(gap) = report.gap {
            log.inner.alerts.raise(
                Alert::new(
                    AlertKind::SequenceGap,
                    format!(
                        "sequences {}..={} were reserved but never persisted",
                        gap.from, gap.through
                    ),
                )
                .at_sequence(gap.from),
            );
            let raw = log.inner.builder.build_trusted(gap.marker_event());
            let marker = log.inner.sequencer.append(raw)?;
            if let Err(e) = log.replicate(&marker).await {
                warn!(error = %e, "gap marker not replicated");
            }
            log.flush().await?;
        }

        info!(
            last_sequence = log.chain_state().last_sequence,
            key_version = %log.key_version(),
            "audit log opened"
        );
        Ok(log)
    }
}
