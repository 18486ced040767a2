//! Restart recovery.
//!
//! Rebuilds the chain head from durable state before any new entry is
//! accepted: the checkpoint, the reservation mark, the newest stored entry,
//! and whatever the emergency file holds. Sequences that were reserved but
//! never persisted are reported as a gap; they are never renumbered.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::builder::AuditEvent;
use crate::chain::ChainState;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::emergency::{EmergencyLog, EmergencyRecord};
use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};
use crate::reservation::Reservations;
use crate::store::{EntryStore, get_anywhere, latest_anywhere};

/// Category of entries the subsystem writes about its own integrity.
pub const INTEGRITY_CATEGORY: &str = "audit.integrity";
/// Action of the gap marker entry.
pub const GAP_ACTION: &str = "sequence_gap";

/// Reserved sequences that never reached durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    /// First lost sequence.
    pub from: u64,
    /// Last lost sequence.
    pub through: u64,
}

impl SequenceGap {
    /// Number of lost sequences.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.through.saturating_sub(self.from).saturating_add(1)
    }

    /// Always false; a gap holds at least one sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Event recording this gap in the chain.
    #[must_use]
    pub fn marker_event(&self) -> AuditEvent {
        AuditEvent::security(INTEGRITY_CATEGORY, GAP_ACTION)
            .actor("vigil")
            .detail("lost_from", self.from)
            .detail("lost_through", self.through)
            .detail("lost_count", self.len())
    }

    /// The range declared by a gap marker entry, if `entry` is one.
    #[must_use]
    pub fn from_marker(entry: &AuditEntry) -> Option<Self> {
        if entry.category != INTEGRITY_CATEGORY || entry.action != GAP_ACTION {
            return None;
        }
        let details = entry.details.as_clear()?;
        let from = details.get("lost_from")?.as_u64()?;
        let through = details.get("lost_through")?.as_u64()?;
        (1..=through).contains(&from).then_some(Self { from, through })
    }

    /// Whether `entry` is a marker whose lost range ends right before it and
    /// covers `expected`.
    #[must_use]
    pub fn accounts_for(entry: &AuditEntry, expected: u64) -> bool {
        Self::from_marker(entry).is_some_and(|gap| {
            (gap.from..=gap.through).contains(&expected) && gap.through.checked_add(1) == Some(entry.sequence)
        })
    }
}

/// What recovery found.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    /// Chain head to resume from.
    pub state: ChainState,
    /// Checkpoint read at startup.
    pub checkpoint: Option<Checkpoint>,
    /// Emergency entries merged into the hot store.
    pub merged_from_emergency: usize,
    /// Emergency entries that could not be joined to the chain.
    pub stranded: usize,
    /// Events in the emergency file that were never chained.
    pub unsequenced: usize,
    /// Highest sequence ever handed out, per the checkpoint and the
    /// reservation mark.
    pub reserved_through: u64,
    /// Reserved but unpersisted range.
    pub gap: Option<SequenceGap>,
}

fn unreadable(what: &str, err: &AuditError) -> AuditError {
    AuditError::Configuration(format!("chain state unavailable: {what}: {err}"))
}

/// Restore the chain head from `hot`, `cold`, the checkpoint, the
/// reservation mark and the emergency file. Merged emergency entries are written to `hot` and the
/// emergency file is retired once nothing in it is stranded.
///
/// # Errors
///
/// Returns [`AuditError::Configuration`] if the chain state cannot be read
/// or the stores contradict the checkpoint. Starting a fresh, unlinked chain
/// over existing state is never an option.
pub async fn recover(
    hot: &dyn EntryStore,
    cold: Option<&dyn EntryStore>,
    checkpoints: Option<&CheckpointStore>,
    emergency: &EmergencyLog,
    reservations: Option<&Reservations>,
) -> AuditResult<RecoveryReport> {
    let checkpoint = match checkpoints {
        Some(store) => store.load().await.map_err(|e| unreadable("checkpoint", &e))?,
        None => None,
    };
    let latest = latest_anywhere(hot, cold)
        .await
        .map_err(|e| unreadable("entry store", &e))?;

    if let Some(cp) = &checkpoint {
        let anchor = get_anywhere(hot, cold, cp.last_sequence)
            .await
            .map_err(|e| unreadable("entry store", &e))?;
        match anchor {
            Some(entry) if entry.content_hash == cp.last_hash => {},
            Some(entry) => {
                return Err(AuditError::Configuration(format!(
                    "checkpoint hash {} does not match stored entry {} ({})",
                    cp.last_hash.short(),
                    entry.sequence,
                    entry.content_hash.short()
                )));
            },
            None if cp.last_sequence == 0 => {},
            None => {
                return Err(AuditError::Configuration(format!(
                    "checkpoint names sequence {} but the store does not hold it",
                    cp.last_sequence
                )));
            },
        }
    }

    let mut state = latest.as_ref().map_or_else(ChainState::genesis, ChainState::after);

    let records = emergency
        .read()
        .map_err(|e| unreadable("emergency log", &e))?;
    let mut unsequenced = 0_usize;
    let mut pending: BTreeMap<u64, AuditEntry> = BTreeMap::new();
    for record in &records {
        match record {
            EmergencyRecord::Sequenced { entry } if entry.sequence > state.last_sequence => {
                pending.entry(entry.sequence).or_insert_with(|| entry.clone());
            },
            EmergencyRecord::Sequenced { .. } => {},
            EmergencyRecord::Unsequenced { .. } => unsequenced = unsequenced.saturating_add(1),
        }
    }

    let mut merged = Vec::new();
    for entry in pending.values() {
        if entry.sequence != state.next_sequence()? || entry.previous_hash != state.last_hash || !entry.verify_hash() {
            break;
        }
        state = ChainState::after(entry);
        merged.push(entry.clone());
    }
    let stranded = pending.len().saturating_sub(merged.len());

    if !merged.is_empty() {
        hot.insert_batch(&merged).await?;
        info!(
            merged = merged.len(),
            through = state.last_sequence,
            "merged emergency entries into the primary store"
        );
    }
    if stranded > 0 {
        warn!(stranded, "emergency entries do not extend the chain; file kept for review");
    } else if !records.is_empty() {
        emergency.retire()?;
    }
    if unsequenced > 0 {
        warn!(unsequenced, "emergency log held events that were never chained");
    }

    let marked = match reservations {
        Some(marks) => marks.load().map_err(|e| unreadable("reservation mark", &e))?,
        None => None,
    };
    let reserved = checkpoint
        .as_ref()
        .map_or(0, |cp| cp.reserved_through)
        .max(marked.unwrap_or(0));
    let gap = (reserved > state.last_sequence).then(|| SequenceGap {
        from: state.last_sequence.saturating_add(1),
        through: reserved,
    });
    if let Some(gap) = gap {
        warn!(from = gap.from, through = gap.through, "reserved sequences were never persisted");
    }

    info!(
        last_sequence = state.last_sequence,
        last_hash = %state.last_hash.short(),
        "chain state recovered"
    );
    Ok(RecoveryReport {
        state,
        checkpoint,
        merged_from_emergency: merged.len(),
        stranded,
        unsequenced,
        reserved_through: reserved.max(state.last_sequence),
        gap,
    })
}
