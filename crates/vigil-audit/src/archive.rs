//! Retention and archiving.
//!
//! Expired entries move from the hot store to cold storage verbatim. Only a
//! contiguous prefix of the hot chain is ever moved, so hot and cold stay two
//! independently verifiable segments that join at a single seam. An elevated
//! entry still inside its longer window holds back everything after it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use vigil_core::Severity;

use crate::alert::{Alert, AlertKind, Alerter};
use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};
use crate::store::EntryStore;

/// How long entries stay in the hot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Window for info, warning and error entries.
    pub standard: Duration,
    /// Window for critical and security entries.
    pub elevated: Duration,
}

impl RetentionPolicy {
    /// Policy from day counts.
    #[must_use]
    pub fn from_days(standard: u32, elevated: u32) -> Self {
        Self {
            standard: Duration::days(i64::from(standard)),
            elevated: Duration::days(i64::from(elevated)),
        }
    }

    /// Window that applies to `level`.
    #[must_use]
    pub fn window_for(&self, level: Severity) -> Duration {
        if level.requires_replication() {
            self.elevated
        } else {
            self.standard
        }
    }

    /// Whether `entry` has outlived its window at `now`.
    #[must_use]
    pub fn is_expired(&self, entry: &AuditEntry, now: DateTime<Utc>) -> bool {
        match entry.timestamp.0.checked_add_signed(self.window_for(entry.level)) {
            Some(expires) => expires <= now,
            None => false,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_days(90, 2555)
    }
}

/// Result of one archive pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Entries moved to cold storage.
    pub archived: u64,
    /// Highest sequence now in cold storage from this pass.
    pub through: Option<u64>,
    /// Unexpired entry that stopped the pass, if any.
    pub held_back_by: Option<u64>,
}

/// Moves expired entries from hot to cold storage.
pub struct Archiver {
    hot: Arc<dyn EntryStore>,
    cold: Arc<dyn EntryStore>,
    policy: RetentionPolicy,
    batch_limit: u64,
    alerts: Alerter,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("policy", &self.policy)
            .field("batch_limit", &self.batch_limit)
            .finish_non_exhaustive()
    }
}

impl Archiver {
    /// Archiver moving at most `batch_limit` entries per pass.
    #[must_use]
    pub fn new(hot: Arc<dyn EntryStore>, cold: Arc<dyn EntryStore>, policy: RetentionPolicy, batch_limit: u64) -> Self {
        Self {
            hot,
            cold,
            policy,
            batch_limit: batch_limit.max(1),
            alerts: Alerter::new(),
        }
    }

    /// Where seam failures are reported.
    #[must_use]
    pub fn with_alerter(mut self, alerts: Alerter) -> Self {
        self.alerts = alerts;
        self
    }

    /// Retention policy in force.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Archive one batch of entries expired at `now`.
    ///
    /// Entries are removed from the hot store only after the cold copy reads
    /// back identical.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ChainBreak`] if the batch does not continue the
    /// cold chain, [`AuditError::Persistence`] if the cold copy does not read
    /// back intact, or any store error. Nothing is removed from the hot store
    /// on error.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AuditResult<ArchiveReport> {
        let mut report = ArchiveReport::default();
        let Some(first) = self.hot.earliest().await? else {
            return Ok(report);
        };
        let window_end = first
            .sequence
            .saturating_add(self.batch_limit.saturating_sub(1));
        let candidates = self.hot.range(first.sequence, window_end).await?;

        let mut batch: Vec<AuditEntry> = Vec::new();
        for entry in candidates {
            if !self.policy.is_expired(&entry, now) {
                report.held_back_by = Some(entry.sequence);
                break;
            }
            let contiguous = batch
                .last()
                .is_none_or(|prev| prev.sequence.checked_add(1) == Some(entry.sequence));
            if !contiguous {
                break;
            }
            batch.push(entry);
        }
        let (Some(head), Some(tail)) = (batch.first(), batch.last()) else {
            debug!(held_back_by = report.held_back_by, "nothing to archive");
            return Ok(report);
        };
        let (head_seq, tail_seq) = (head.sequence, tail.sequence);

        self.check_seam(head).await?;

        self.cold.insert_batch(&batch).await?;
        let copied = self.cold.range(head_seq, tail_seq).await?;
        if copied != batch {
            return Err(AuditError::Persistence(format!(
                "cold copy of {head_seq}..={tail_seq} did not read back intact"
            )));
        }

        let removed = self.hot.remove_through(tail_seq).await?;
        report.archived = u64::try_from(batch.len()).unwrap_or(u64::MAX);
        report.through = Some(tail_seq);
        info!(
            from = head_seq,
            through = tail_seq,
            archived = report.archived,
            removed,
            "entries archived to cold storage"
        );
        Ok(report)
    }

    async fn check_seam(&self, head: &AuditEntry) -> AuditResult<()> {
        if head.sequence <= 1 {
            return Ok(());
        }
        let predecessor = self.cold.get(head.sequence.saturating_sub(1)).await?;
        let failure = match predecessor {
            Some(prev) if head.follows(&prev) => return Ok(()),
            Some(prev) => AuditError::ChainBreak {
                sequence: head.sequence,
                expected: prev.content_hash,
                found: head.previous_hash,
            },
            None => {
                // An empty cold store may start anywhere.
                if self.cold.count().await? == 0 {
                    return Ok(());
                }
                AuditError::Persistence(format!(
                    "cold storage has no entry {} to join sequence {} to",
                    head.sequence.saturating_sub(1),
                    head.sequence
                ))
            },
        };
        self.alerts.raise(
            Alert::new(AlertKind::ArchiveSeam, format!("archive seam rejected: {failure}"))
                .at_sequence(head.sequence),
        );
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use vigil_core::{EntryId, Timestamp};
    use vigil_crypto::{ContentHash, KeyPair, KeyVersion, SigningIdentity};

    use super::*;
    use crate::alert::RecordingAlertHook;
    use crate::chain::{ChainState, chain};
    use crate::entry::RawEntry;
    use crate::store::MemoryEntryStore;
    use crate::value::{EntryMetadata, Payload};

    fn aged_chain(levels_and_age_days: &[(Severity, i64)]) -> Vec<AuditEntry> {
        let signer = SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL);
        let mut state = ChainState::genesis();
        let now = Utc::now();
        levels_and_age_days
            .iter()
            .map(|(level, age)| {
                let ts = now.checked_sub_signed(Duration::days(*age)).unwrap();
                let raw = RawEntry {
                    id: EntryId::new(),
                    timestamp: Timestamp::from_datetime(ts),
                    level: *level,
                    category: "test".into(),
                    action: "age".into(),
                    actor: None,
                    details: Payload::empty(),
                    metadata: EntryMetadata::default(),
                    references: None,
                };
                chain(raw, &mut state, &signer).unwrap()
            })
            .collect()
    }

    fn stores() -> (Arc<MemoryEntryStore>, Arc<MemoryEntryStore>) {
        (Arc::new(MemoryEntryStore::new()), Arc::new(MemoryEntryStore::new()))
    }

    #[test]
    fn test_elevated_window_longer() {
        let policy = RetentionPolicy::from_days(30, 365);
        let entries = aged_chain(&[(Severity::Info, 40), (Severity::Security, 40)]);
        let now = Utc::now();
        assert!(policy.is_expired(&entries[0], now));
        assert!(!policy.is_expired(&entries[1], now));
    }

    #[tokio::test]
    async fn test_moves_expired_prefix_verbatim() {
        let entries = aged_chain(&[
            (Severity::Info, 100),
            (Severity::Info, 100),
            (Severity::Info, 100),
            (Severity::Info, 1),
        ]);
        let (hot, cold) = stores();
        hot.insert_batch(&entries).await.unwrap();
        let archiver = Archiver::new(hot.clone(), cold.clone(), RetentionPolicy::from_days(30, 365), 100);

        let report = archiver.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.archived, 3);
        assert_eq!(report.through, Some(3));
        assert_eq!(report.held_back_by, Some(4));
        assert_eq!(cold.range(1, 3).await.unwrap(), entries[..3].to_vec());
        assert_eq!(hot.earliest().await.unwrap().unwrap().sequence, 4);
    }

    #[tokio::test]
    async fn test_elevated_entry_holds_back_later_entries() {
        let entries = aged_chain(&[(Severity::Info, 100), (Severity::Critical, 100), (Severity::Info, 100)]);
        let (hot, cold) = stores();
        hot.insert_batch(&entries).await.unwrap();
        let archiver = Archiver::new(hot.clone(), cold.clone(), RetentionPolicy::from_days(30, 365), 100);

        let report = archiver.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.held_back_by, Some(2));
        assert_eq!(hot.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_limit_and_consecutive_passes_join() {
        let entries = aged_chain(&[(Severity::Info, 100); 5]);
        let (hot, cold) = stores();
        hot.insert_batch(&entries).await.unwrap();
        let archiver = Archiver::new(hot.clone(), cold.clone(), RetentionPolicy::from_days(30, 365), 2);

        assert_eq!(archiver.run_once(Utc::now()).await.unwrap().through, Some(2));
        assert_eq!(archiver.run_once(Utc::now()).await.unwrap().through, Some(4));
        assert_eq!(archiver.run_once(Utc::now()).await.unwrap().through, Some(5));
        assert_eq!(cold.count().await.unwrap(), 5);
        assert_eq!(hot.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_seam_refused() {
        let entries = aged_chain(&[(Severity::Info, 100); 3]);
        let (hot, cold) = stores();
        let mut forged = entries[0].clone();
        forged.content_hash = ContentHash::hash(b"other");
        cold.insert_batch(&[forged]).await.unwrap();
        hot.insert_batch(&entries[1..]).await.unwrap();
        let hook = Arc::new(RecordingAlertHook::new());
        let archiver = Archiver::new(hot.clone(), cold, RetentionPolicy::from_days(30, 365), 100)
            .with_alerter(Alerter::new().with_hook(hook.clone()));

        let err = archiver.run_once(Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuditError::ChainBreak { sequence: 2, .. }));
        assert!(hook.saw(AlertKind::ArchiveSeam));
        assert_eq!(hot.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_hot_store() {
        let (hot, cold) = stores();
        let archiver = Archiver::new(hot, cold, RetentionPolicy::default(), 10);
        assert_eq!(archiver.run_once(Utc::now()).await.unwrap(), ArchiveReport::default());
    }
}
