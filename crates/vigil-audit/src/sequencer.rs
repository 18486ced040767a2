//! Sequencer and micro-batching buffer.
//!
//! The only serialized section in the subsystem: assigning a sequence number,
//! chaining and signing, and pushing onto the buffer happen under one lock so
//! the buffer order is the chain order.
//!
//! With a [`Reservations`] mark attached, no sequence is handed out before
//! the mark covers it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info};
use vigil_crypto::{KeyVersion, PublicKey, SigningIdentity};

use crate::chain::{ChainState, chain};
use crate::entry::{AuditEntry, RawEntry};
use crate::error::AuditResult;
use crate::reservation::Reservations;

struct Inner {
    state: ChainState,
    signer: SigningIdentity,
    buffer: Vec<AuditEntry>,
    reserved_through: u64,
}

/// Assigns sequence numbers and buffers chained entries until flush.
pub struct Sequencer {
    inner: Mutex<Inner>,
    batch_size: usize,
    batch_ready: Notify,
    reservations: Option<Arc<Reservations>>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Sequencer")
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .field("batch_size", &self.batch_size)
            .field("reserved_through", &inner.reserved_through)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Start from `state`, signing with `signer`.
    #[must_use]
    pub fn new(state: ChainState, signer: SigningIdentity, batch_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reserved_through: state.last_sequence,
                state,
                signer,
                buffer: Vec::with_capacity(batch_size),
            }),
            batch_size: batch_size.max(1),
            batch_ready: Notify::new(),
            reservations: None,
        }
    }

    /// Record reservations in `marks`, which already cover `reserved_through`.
    #[must_use]
    pub fn with_reservations(mut self, marks: Arc<Reservations>, reserved_through: u64) -> Self {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.reserved_through = reserved_through.max(inner.state.last_sequence);
        self.reservations = Some(marks);
        self
    }

    // A panic while holding the lock cannot leave `Inner` half-updated:
    // `chain` only mutates state after every fallible step.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Raise the mark by one batch when the next sequence is not yet covered.
    fn reserve_next(&self, inner: &mut Inner) -> AuditResult<()> {
        let Some(marks) = &self.reservations else {
            return Ok(());
        };
        let next = inner.state.next_sequence()?;
        if next <= inner.reserved_through {
            return Ok(());
        }
        let block = u64::try_from(self.batch_size).unwrap_or(u64::MAX);
        let through = next.saturating_add(block.saturating_sub(1));
        marks.store(through)?;
        inner.reserved_through = through;
        Ok(())
    }

    /// Chain `raw` onto the head and buffer it. Returns the chained entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence space is exhausted or the
    /// reservation mark cannot be raised.
    pub fn append(&self, raw: RawEntry) -> AuditResult<AuditEntry> {
        let (entry, full) = {
            let mut inner = self.lock();
            self.reserve_next(&mut inner)?;
            let Inner { state, signer, buffer, .. } = &mut *inner;
            let entry = chain(raw, state, signer)?;
            buffer.push(entry.clone());
            (entry, buffer.len() >= self.batch_size)
        };
        if full || entry.is_elevated() {
            self.batch_ready.notify_one();
        }
        Ok(entry)
    }

    /// Chain `raw` with the current key, then install `next` for every later entry.
    ///
    /// Both happen under the same lock, so no entry can slip between the
    /// rotation record and the key change.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence space is exhausted or the reservation
    /// mark cannot be raised; the old key stays active.
    pub fn rotate(&self, raw: RawEntry, next: SigningIdentity) -> AuditResult<AuditEntry> {
        let entry = {
            let mut inner = self.lock();
            self.reserve_next(&mut inner)?;
            let Inner { state, signer, buffer, .. } = &mut *inner;
            let entry = chain(raw, state, signer)?;
            buffer.push(entry.clone());
            info!(
                sequence = entry.sequence,
                from = %signer.version(),
                to = %next.version(),
                "signing key rotated"
            );
            *signer = next;
            entry
        };
        self.batch_ready.notify_one();
        Ok(entry)
    }

    /// Swap out the buffer for flushing. New entries go into a fresh buffer.
    #[must_use]
    pub fn drain(&self) -> Vec<AuditEntry> {
        let mut inner = self.lock();
        let batch = std::mem::replace(&mut inner.buffer, Vec::with_capacity(self.batch_size));
        if !batch.is_empty() {
            debug!(batch_len = batch.len(), through = inner.state.last_sequence, "drained buffer");
        }
        batch
    }

    /// Lower the reservation mark to the chain head.
    ///
    /// Called after a flush so that a later clean restart sees no gap. Every
    /// sequence handed out stays covered.
    ///
    /// # Errors
    ///
    /// Returns an error if the mark cannot be written.
    pub fn settle(&self) -> AuditResult<()> {
        let Some(marks) = &self.reservations else {
            return Ok(());
        };
        let mut inner = self.lock();
        let head = inner.state.last_sequence;
        if inner.reserved_through > head {
            marks.store(head)?;
            inner.reserved_through = head;
        }
        Ok(())
    }

    /// Highest sequence covered by the reservation mark.
    #[must_use]
    pub fn reserved_through(&self) -> u64 {
        self.lock().reserved_through
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Current chain head, including buffered entries.
    #[must_use]
    pub fn state(&self) -> ChainState {
        self.lock().state
    }

    /// Version of the active signing key.
    #[must_use]
    pub fn key_version(&self) -> KeyVersion {
        self.lock().signer.version()
    }

    /// Public half of the active signing key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.lock().signer.public_key()
    }

    /// Resolves when the buffer reaches the batch size or an elevated entry arrives.
    pub async fn batch_ready(&self) {
        self.batch_ready.notified().await;
    }

    /// Configured batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vigil_core::{EntryId, Severity, Timestamp};
    use vigil_crypto::KeyPair;

    use super::*;
    use crate::value::{EntryMetadata, Payload};

    fn raw(level: Severity) -> RawEntry {
        RawEntry {
            id: EntryId::new(),
            timestamp: Timestamp::now(),
            level,
            category: "test".into(),
            action: "append".into(),
            actor: None,
            details: Payload::empty(),
            metadata: EntryMetadata::default(),
            references: None,
        }
    }

    fn sequencer(batch_size: usize) -> Sequencer {
        Sequencer::new(
            ChainState::genesis(),
            SigningIdentity::new(KeyPair::generate(), KeyVersion::INITIAL),
            batch_size,
        )
    }

    #[test]
    fn test_append_and_drain() {
        let seq = sequencer(10);
        for _ in 0..3 {
            seq.append(raw(Severity::Info)).unwrap();
        }
        assert_eq!(seq.buffered(), 3);
        let batch = seq.drain();
        assert_eq!(batch.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(seq.buffered(), 0);
        assert_eq!(seq.state().last_sequence, 3);
    }

    #[test]
    fn test_drain_then_append_continues_chain() {
        let seq = sequencer(10);
        let first = seq.append(raw(Severity::Info)).unwrap();
        let _ = seq.drain();
        let second = seq.append(raw(Severity::Info)).unwrap();
        assert!(second.follows(&first));
    }

    #[test]
    fn test_rotation_switches_key_after_record() {
        let seq = sequencer(10);
        seq.append(raw(Severity::Info)).unwrap();
        let next = SigningIdentity::new(KeyPair::generate(), KeyVersion(2));
        let next_public = next.public_key();

        let rotation = seq.rotate(raw(Severity::Critical), next).unwrap();
        assert_eq!(rotation.key_version, KeyVersion::INITIAL);

        let after = seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(after.key_version, KeyVersion(2));
        assert_eq!(seq.public_key(), next_public);
        assert!(after.follows(&rotation));
    }

    #[tokio::test]
    async fn test_batch_full_notifies() {
        let seq = Arc::new(sequencer(2));
        seq.append(raw(Severity::Info)).unwrap();
        seq.append(raw(Severity::Info)).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), seq.batch_ready())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_elevated_entry_notifies() {
        let seq = sequencer(100);
        seq.append(raw(Severity::Security)).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), seq.batch_ready())
            .await
            .unwrap();
    }

    #[test]
    fn test_reserves_in_blocks_before_handing_out() {
        let marks = Arc::new(Reservations::in_memory());
        let seq = sequencer(4).with_reservations(Arc::clone(&marks), 0);

        seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(marks.load().unwrap(), Some(4));
        for _ in 0..3 {
            seq.append(raw(Severity::Info)).unwrap();
        }
        assert_eq!(marks.load().unwrap(), Some(4));

        seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(marks.load().unwrap(), Some(8));
        assert_eq!(seq.reserved_through(), 8);
    }

    #[test]
    fn test_settle_lowers_mark_to_head() {
        let marks = Arc::new(Reservations::in_memory());
        let seq = sequencer(10).with_reservations(Arc::clone(&marks), 0);
        seq.append(raw(Severity::Info)).unwrap();
        seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(marks.load().unwrap(), Some(10));

        seq.settle().unwrap();
        assert_eq!(marks.load().unwrap(), Some(2));

        let third = seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(third.sequence, 3);
        assert_eq!(marks.load().unwrap(), Some(12));
    }

    #[test]
    fn test_starting_mark_is_honored() {
        let marks = Arc::new(Reservations::in_memory());
        let seq = sequencer(10).with_reservations(Arc::clone(&marks), 5);
        seq.append(raw(Severity::Info)).unwrap();
        assert_eq!(marks.load().unwrap(), None);
    }

    #[test]
    fn test_concurrent_appends_are_totally_ordered() {
        let seq = Arc::new(sequencer(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        seq.append(raw(Severity::Info)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let batch = seq.drain();
        assert_eq!(batch.len(), 400);
        for pair in batch.windows(2) {
            assert!(pair[1].follows(&pair[0]));
        }
    }
}
