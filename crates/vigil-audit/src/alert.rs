//! Operational alerts.
//!
//! Every alert is logged under the `vigil::alert` target and handed to any
//! registered [`AlertHook`]. Delivery to paging or chat systems is up to the
//! host.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The primary store failed; entries went to a fallback sink.
    PersistenceDegraded,
    /// No durable sink confirmed a batch.
    PersistenceFailed,
    /// Verification found a chain break, tampering or a bad signature.
    IntegrityViolation,
    /// Critical fan-out missed its acknowledgement quorum.
    ReplicationFailed,
    /// Sequences were reserved but never persisted.
    SequenceGap,
    /// The checkpoint could not be rewritten.
    CheckpointFailed,
    /// The daily journal could not be appended.
    JournalFailed,
    /// Hot and cold storage do not join at the archive seam.
    ArchiveSeam,
}

impl AlertKind {
    /// Stable identifier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersistenceDegraded => "persistence_degraded",
            Self::PersistenceFailed => "persistence_failed",
            Self::IntegrityViolation => "integrity_violation",
            Self::ReplicationFailed => "replication_failed",
            Self::SequenceGap => "sequence_gap",
            Self::CheckpointFailed => "checkpoint_failed",
            Self::JournalFailed => "journal_failed",
            Self::ArchiveSeam => "archive_seam",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Category.
    pub kind: AlertKind,
    /// Human-readable description.
    pub message: String,
    /// Sequence the alert concerns, if any.
    pub sequence: Option<u64>,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// New alert raised now.
    #[must_use]
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sequence: None,
            raised_at: Utc::now(),
        }
    }

    /// Attach the sequence the alert concerns.
    #[must_use]
    pub fn at_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Receives alerts. Implementations must not block.
pub trait AlertHook: Send + Sync {
    /// Handle one alert.
    fn on_alert(&self, alert: &Alert);
}

/// Fans alerts out to the log and every hook.
#[derive(Clone, Default)]
pub struct Alerter {
    hooks: Vec<Arc<dyn AlertHook>>,
}

impl fmt::Debug for Alerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alerter").field("hooks", &self.hooks.len()).finish()
    }
}

impl Alerter {
    /// Alerter with no hooks; alerts are only logged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Log `alert` and deliver it to every hook.
    pub fn raise(&self, alert: Alert) {
        error!(
            target: "vigil::alert",
            kind = %alert.kind,
            sequence = alert.sequence,
            "{}",
            alert.message
        );
        for hook in &self.hooks {
            hook.on_alert(&alert);
        }
    }
}

/// Hook that keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertHook {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertHook {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether any alert of `kind` was received.
    #[must_use]
    pub fn saw(&self, kind: AlertKind) -> bool {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|a| a.kind == kind)
    }
}

impl AlertHook for RecordingAlertHook {
    fn on_alert(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
    }
}
