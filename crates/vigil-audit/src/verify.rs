//! Integrity verification.
//!
//! Walks entries in sequence order with a running expected previous hash.
//! Each entry is checked for linkage, content and signature independently,
//! and the expected hash always advances to the entry's stored hash, so one
//! break does not hide later ones or produce cascading false positives.
//! Findings are reported, never repaired.
//!
//! Signatures are checked over the stored content hash, the same contract as
//! [`AuditEntry::verify_signature`]; content changes show up as tamper.
//!
//! A jump in sequence numbers is a gap unless the entry after it is a gap
//! marker for exactly that range, written at restart after a crash.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vigil_crypto::{ContentHash, KeyRing, KeyVersion};

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};
use crate::recovery::SequenceGap;
use crate::store::{EntryStore, get_anywhere, merged_bounds, read_merged};

const PAGE_SIZE: u64 = 512;

/// One verification finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// `previous_hash` does not match the predecessor's content hash.
    ChainBreak {
        /// Entry whose link is broken.
        sequence: u64,
        /// Predecessor's stored content hash.
        expected: ContentHash,
        /// Previous hash recorded in the entry.
        found: ContentHash,
    },
    /// The recomputed content hash differs from the stored one.
    Tamper {
        /// Altered entry.
        sequence: u64,
        /// Stored hash.
        stored: ContentHash,
        /// Hash recomputed from the fields.
        computed: ContentHash,
    },
    /// The signature is invalid or names an unknown key version.
    Signature {
        /// Entry with the bad signature.
        sequence: u64,
        /// Key version it claims.
        key_version: KeyVersion,
        /// Why verification failed.
        reason: String,
    },
    /// Sequences are missing between two stored entries.
    SequenceGap {
        /// Sequence that should have come next.
        expected: u64,
        /// Sequence actually found.
        found: u64,
    },
    /// The range ends before its last expected sequence.
    Truncated {
        /// First missing sequence.
        expected: u64,
        /// Last sequence that should exist.
        through: u64,
    },
}

impl IntegrityIssue {
    /// Sequence the finding is reported at.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::ChainBreak { sequence, .. } | Self::Tamper { sequence, .. } | Self::Signature { sequence, .. } => {
                *sequence
            },
            Self::SequenceGap { found, .. } => *found,
            Self::Truncated { expected, .. } => *expected,
        }
    }

    /// The matching error value.
    #[must_use]
    pub fn to_error(&self) -> AuditError {
        match self.clone() {
            Self::ChainBreak {
                sequence,
                expected,
                found,
            } => AuditError::ChainBreak {
                sequence,
                expected,
                found,
            },
            Self::Tamper {
                sequence,
                stored,
                computed,
            } => AuditError::Tamper {
                sequence,
                stored,
                computed,
            },
            Self::Signature {
                sequence,
                key_version,
                reason,
            } => AuditError::Signature {
                sequence,
                key_version,
                reason,
            },
            Self::SequenceGap { expected, found } => AuditError::SequenceGap { expected, found },
            Self::Truncated { expected, through } => AuditError::Truncated { expected, through },
        }
    }
}

/// Counters gathered during a walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStats {
    /// Entries examined.
    pub entries_checked: u64,
    /// First sequence examined.
    pub first_sequence: Option<u64>,
    /// Last sequence examined.
    pub last_sequence: Option<u64>,
    /// Key versions seen.
    pub key_versions: BTreeSet<KeyVersion>,
    /// Whether the first entry was checked against a known predecessor.
    pub anchored: bool,
    /// Wall time spent.
    pub elapsed_ms: u64,
}

/// Outcome of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True when no issue was found.
    pub valid: bool,
    /// Every finding, in sequence order.
    pub issues: Vec<IntegrityIssue>,
    /// Counters.
    pub stats: VerificationStats,
}

impl VerificationReport {
    /// Sequences with a chain break.
    #[must_use]
    pub fn chain_breaks(&self) -> Vec<u64> {
        self.issues
            .iter()
            .filter(|i| matches!(i, IntegrityIssue::ChainBreak { .. }))
            .map(IntegrityIssue::sequence)
            .collect()
    }

    /// Sequences with tampered content.
    #[must_use]
    pub fn tampered(&self) -> Vec<u64> {
        self.issues
            .iter()
            .filter(|i| matches!(i, IntegrityIssue::Tamper { .. }))
            .map(IntegrityIssue::sequence)
            .collect()
    }

    /// Findings of missing sequences, inside or at the end of the range.
    #[must_use]
    pub fn missing(&self) -> Vec<&IntegrityIssue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, IntegrityIssue::SequenceGap { .. } | IntegrityIssue::Truncated { .. }))
            .collect()
    }

    /// Sequences with a bad signature.
    #[must_use]
    pub fn bad_signatures(&self) -> Vec<u64> {
        self.issues
            .iter()
            .filter(|i| matches!(i, IntegrityIssue::Signature { .. }))
            .map(IntegrityIssue::sequence)
            .collect()
    }

    /// The stats if valid, otherwise the first finding as an error.
    ///
    /// # Errors
    ///
    /// Returns the error matching the first issue.
    pub fn into_result(self) -> AuditResult<VerificationStats> {
        match self.issues.first() {
            Some(issue) => Err(issue.to_error()),
            None => Ok(self.stats),
        }
    }
}

/// Incremental walk state.
struct Walk<'k> {
    keys: &'k KeyRing,
    expected_previous: Option<ContentHash>,
    expected_sequence: Option<u64>,
    issues: Vec<IntegrityIssue>,
    stats: VerificationStats,
}

impl<'k> Walk<'k> {
    fn new(keys: &'k KeyRing, anchor: Option<ContentHash>) -> Self {
        Self {
            keys,
            expected_previous: anchor,
            expected_sequence: None,
            issues: Vec::new(),
            stats: VerificationStats {
                anchored: anchor.is_some(),
                ..VerificationStats::default()
            },
        }
    }

    fn check(&mut self, entry: &AuditEntry) {
        let gap = match self.expected_sequence {
            Some(expected) if expected != entry.sequence && !SequenceGap::accounts_for(entry, expected) => {
                self.issues.push(IntegrityIssue::SequenceGap {
                    expected,
                    found: entry.sequence,
                });
                true
            },
            _ => false,
        };

        if !gap {
            if let Some(expected) = self.expected_previous {
                if entry.previous_hash != expected {
                    self.issues.push(IntegrityIssue::ChainBreak {
                        sequence: entry.sequence,
                        expected,
                        found: entry.previous_hash,
                    });
                }
            }
        }

        let computed = entry.compute_hash();
        if computed != entry.content_hash {
            self.issues.push(IntegrityIssue::Tamper {
                sequence: entry.sequence,
                stored: entry.content_hash,
                computed,
            });
        }

        if let Err(AuditError::Signature { reason, .. }) = entry.verify_signature(self.keys) {
            self.issues.push(IntegrityIssue::Signature {
                sequence: entry.sequence,
                key_version: entry.key_version,
                reason,
            });
        }

        self.expected_previous = Some(entry.content_hash);
        self.expected_sequence = entry.sequence.checked_add(1);
        self.stats.entries_checked = self.stats.entries_checked.saturating_add(1);
        self.stats.first_sequence.get_or_insert(entry.sequence);
        self.stats.last_sequence = Some(entry.sequence);
        self.stats.key_versions.insert(entry.key_version);
    }

    fn finish(mut self, started: Instant) -> VerificationReport {
        self.stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        VerificationReport {
            valid: self.issues.is_empty(),
            issues: self.issues,
            stats: self.stats,
        }
    }
}

/// Read-only chain verifier.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    keys: KeyRing,
}

impl IntegrityVerifier {
    /// Verifier trusting every key in `keys`.
    #[must_use]
    pub fn new(keys: KeyRing) -> Self {
        Self { keys }
    }

    /// Trusted keys.
    #[must_use]
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Verify `entries`, which must be in ascending sequence order.
    ///
    /// `anchor` is the content hash of the entry before the first one, or
    /// `None` to trust the first entry's link.
    #[must_use]
    pub fn verify_entries<'a>(
        &self,
        anchor: Option<ContentHash>,
        entries: impl IntoIterator<Item = &'a AuditEntry>,
    ) -> VerificationReport {
        let started = Instant::now();
        let mut walk = Walk::new(&self.keys, anchor);
        for entry in entries {
            walk.check(entry);
        }
        walk.finish(started)
    }

    /// Verify `start..=end` across hot and cold storage, page by page.
    ///
    /// `start` defaults to 1 and anchors on the genesis hash there. `end`
    /// defaults to the newer of the newest stored entry and `head`, the last
    /// sequence known to be persisted. The range is not narrowed to what is
    /// stored: missing sequences before the first stored entry are a
    /// [`IntegrityIssue::SequenceGap`], missing ones at the end are
    /// [`IntegrityIssue::Truncated`].
    ///
    /// # Errors
    ///
    /// Returns an error only if a store cannot be read. Integrity findings
    /// are in the report.
    pub async fn verify_range(
        &self,
        hot: &dyn EntryStore,
        cold: Option<&dyn EntryStore>,
        start: Option<u64>,
        end: Option<u64>,
        head: Option<u64>,
    ) -> AuditResult<VerificationReport> {
        let started = Instant::now();
        let high = merged_bounds(hot, cold).await?.map_or(0, |(_, high)| high);
        let start = start.unwrap_or(1).max(1);
        let end = end.unwrap_or_else(|| high.max(head.unwrap_or(0)));
        if start > end {
            return Ok(Walk::new(&self.keys, None).finish(started));
        }

        let anchor = if start == 1 {
            Some(ContentHash::GENESIS)
        } else {
            get_anywhere(hot, cold, start.saturating_sub(1))
                .await?
                .map(|e| e.content_hash)
        };
        let mut walk = Walk::new(&self.keys, anchor);
        walk.expected_sequence = Some(start);

        let mut page_start = start;
        while page_start <= end && page_start <= high {
            let page_end = page_start.saturating_add(PAGE_SIZE.saturating_sub(1)).min(end);
            for entry in read_merged(hot, cold, page_start, page_end).await? {
                walk.check(&entry);
            }
            match page_end.checked_add(1) {
                Some(next) => page_start = next,
                None => break,
            }
        }
        if let Some(expected) = walk.expected_sequence {
            if expected <= end {
                walk.issues.push(IntegrityIssue::Truncated { expected, through: end });
            }
        }

        let report = walk.finish(started);
        if report.valid {
            info!(
                entries = report.stats.entries_checked,
                start,
                end,
                elapsed_ms = report.stats.elapsed_ms,
                "chain verified"
            );
        } else {
            warn!(
                issues = report.issues.len(),
                start,
                end,
                "chain verification found integrity issues"
            );
        }
        Ok(report)
    }
}
