//! Persistence writer.
//!
//! One flush is one batched insert into the primary store, one append to the
//! daily journal and one checkpoint rewrite. When the primary store fails the
//! batch is written to the emergency file and kept in a backlog that is
//! prepended to the next primary insert, so the primary store never develops
//! holes.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use vigil_core::{RetryOutcome, RetryPolicy, retry};
use vigil_crypto::KeyVersion;

use crate::alert::{Alert, AlertKind, Alerter};
use crate::chain::ChainState;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::emergency::EmergencyLog;
use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};
use crate::journal::Journal;
use crate::store::EntryStore;

/// What a flush achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries in the batch handed to this flush.
    pub flushed: usize,
    /// Whether the primary store confirmed the batch and the backlog.
    pub primary: bool,
    /// Whether the journal confirmed the batch.
    pub journal: bool,
    /// Whether the batch went to the emergency file.
    pub emergency: bool,
    /// Entries still waiting for the primary store.
    pub backlog: usize,
    /// Primary store attempts made.
    pub attempts: u32,
}

/// Writes drained batches to every durable sink.
pub struct PersistenceWriter {
    primary: Arc<dyn EntryStore>,
    journal: Option<Journal>,
    emergency: Arc<EmergencyLog>,
    checkpoints: Option<CheckpointStore>,
    retry: RetryPolicy,
    alerts: Alerter,
    backlog: tokio::sync::Mutex<Vec<AuditEntry>>,
    persisted: Mutex<ChainState>,
}

impl std::fmt::Debug for PersistenceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWriter")
            .field("journal", &self.journal)
            .field("emergency", &self.emergency)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PersistenceWriter {
    /// Writer over `primary`, falling back to `emergency`.
    #[must_use]
    pub fn new(primary: Arc<dyn EntryStore>, emergency: Arc<EmergencyLog>) -> Self {
        Self {
            primary,
            journal: None,
            emergency,
            checkpoints: None,
            retry: RetryPolicy::default(),
            alerts: Alerter::new(),
            backlog: tokio::sync::Mutex::new(Vec::new()),
            persisted: Mutex::new(ChainState::genesis()),
        }
    }

    /// Also append every batch to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Rewrite the checkpoint after every confirmed primary write.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Backoff schedule for primary store writes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Where degraded and failed flushes are reported.
    #[must_use]
    pub fn with_alerter(mut self, alerts: Alerter) -> Self {
        self.alerts = alerts;
        self
    }

    /// Chain position already confirmed by the primary store.
    #[must_use]
    pub fn with_persisted(self, state: ChainState) -> Self {
        *self.persisted.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self
    }

    /// Newest entry confirmed by the primary store.
    #[must_use]
    pub fn persisted(&self) -> ChainState {
        *self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The emergency sink.
    #[must_use]
    pub fn emergency(&self) -> &Arc<EmergencyLog> {
        &self.emergency
    }

    /// Entries waiting for the primary store.
    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }

    /// Write `batch` and any backlog.
    ///
    /// `reserved_through` and `key_version` describe the sequencer at drain
    /// time and go into the checkpoint. Callers must serialize flushes so
    /// batches arrive in chain order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Persistence`] if no durable sink confirmed the
    /// batch. The entries stay in the backlog for the next flush.
    pub async fn flush(
        &self,
        batch: Vec<AuditEntry>,
        reserved_through: u64,
        key_version: KeyVersion,
    ) -> AuditResult<FlushReport> {
        let mut backlog = self.backlog.lock().await;
        if batch.is_empty() && backlog.is_empty() {
            return Ok(FlushReport::default());
        }
        let flushed = batch.len();
        backlog.extend(batch.iter().cloned());

        let primary = Arc::clone(&self.primary);
        let pending: &[AuditEntry] = &backlog;
        let outcome = retry(
            &self.retry,
            |attempt| {
                let primary = Arc::clone(&primary);
                async move {
                    if attempt > 0 {
                        warn!(attempt, batch_len = pending.len(), "retrying primary store write");
                    }
                    primary.insert_batch(pending).await
                }
            },
            |_: &AuditError| true,
        )
        .await;

        let journal = self.append_journal(&batch).await;

        let mut report = FlushReport {
            flushed,
            journal,
            ..FlushReport::default()
        };

        match outcome {
            RetryOutcome::Success { attempts, .. } => {
                report.primary = true;
                report.attempts = attempts;
                let head = backlog.last().map(ChainState::after);
                backlog.clear();
                if let Some(head) = head {
                    self.advance(head, reserved_through, key_version).await;
                }
                debug!(batch_len = flushed, attempts, "flush committed");
                Ok(report)
            },
            RetryOutcome::Exhausted { error, attempts } => {
                report.attempts = attempts;
                report.backlog = backlog.len();
                let first = backlog.first().map(|e| e.sequence);
                let mut degraded = Alert::new(
                    AlertKind::PersistenceDegraded,
                    format!("primary store write failed after {attempts} attempts: {error}"),
                );
                if let Some(first) = first {
                    degraded = degraded.at_sequence(first);
                }
                self.alerts.raise(degraded);

                report.emergency = match self.emergency.append_entries(&batch) {
                    Ok(()) => !batch.is_empty(),
                    Err(e) => {
                        warn!(error = %e, "emergency log write failed");
                        false
                    },
                };

                if report.journal || report.emergency || batch.is_empty() {
                    info!(
                        batch_len = flushed,
                        backlog = report.backlog,
                        journal = report.journal,
                        emergency = report.emergency,
                        "flush degraded; entries held for the primary store"
                    );
                    Ok(report)
                } else {
                    self.alerts.raise(Alert::new(
                        AlertKind::PersistenceFailed,
                        format!("no durable sink confirmed {flushed} entries"),
                    ));
                    Err(AuditError::Persistence(format!(
                        "no durable sink confirmed the batch; {} entries held in memory: {error}",
                        report.backlog
                    )))
                }
            },
        }
    }

    async fn append_journal(&self, batch: &[AuditEntry]) -> bool {
        let Some(journal) = &self.journal else {
            return false;
        };
        if batch.is_empty() {
            return true;
        }
        match journal.append(batch).await {
            Ok(()) => true,
            Err(e) => {
                self.alerts
                    .raise(Alert::new(AlertKind::JournalFailed, format!("journal append failed: {e}")));
                false
            },
        }
    }

    async fn advance(&self, head: ChainState, reserved_through: u64, key_version: KeyVersion) {
        let state = {
            let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
            if head.last_sequence <= persisted.last_sequence {
                return;
            }
            *persisted = head;
            head
        };
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        let checkpoint = Checkpoint::new(state, reserved_through, key_version);
        if let Err(e) = checkpoints.save(&checkpoint).await {
            self.alerts.raise(
                Alert::new(AlertKind::CheckpointFailed, format!("checkpoint write failed: {e}"))
                    .at_sequence(state.last_sequence),
            );
        }
    }
}
