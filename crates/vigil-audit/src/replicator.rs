//! Critical-event replication.
//!
//! Critical and security entries are pushed to every redundant sink before
//! the caller's logging call returns. The call succeeds once `min_acks` sinks
//! confirm within the timeout.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertKind, Alerter};
use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};

/// A redundant destination for critical entries.
#[async_trait]
pub trait ReplicaSink: Send + Sync {
    /// Name used in logs and receipts.
    fn name(&self) -> &str;

    /// Durably store `entry`.
    async fn replicate(&self, entry: &AuditEntry) -> AuditResult<()>;
}

/// Forensic-only append file. Nothing but the replicator writes to it.
#[derive(Debug)]
pub struct FileReplica {
    name: String,
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileReplica {
    /// Replica appending to `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl ReplicaSink for FileReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn replicate(&self, entry: &AuditEntry) -> AuditResult<()> {
        let mut line = entry.to_json_line()?;
        line.push('\n');
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || -> AuditResult<()> {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
            Ok(())
        })
        .await
        .map_err(|e| AuditError::Persistence(format!("replica task failed: {e}")))?
    }
}

/// In-memory replica for tests. Can be switched to fail.
#[derive(Debug, Default)]
pub struct MemoryReplica {
    name: String,
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl MemoryReplica {
    /// Empty replica called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Make every later `replicate` call fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Entries received so far.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ReplicaSink for MemoryReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn replicate(&self, entry: &AuditEntry) -> AuditResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Persistence(format!("replica {} unavailable", self.name)));
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

/// Proof that an entry reached its quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReceipt {
    /// Replicated sequence.
    pub sequence: u64,
    /// Sinks that acknowledged.
    pub acknowledged: Vec<String>,
    /// Sinks that failed or timed out, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Synchronous fan-out to every replica sink.
#[derive(Clone)]
pub struct Replicator {
    sinks: Vec<Arc<dyn ReplicaSink>>,
    min_acks: usize,
    timeout: Duration,
    alerts: Alerter,
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Replicator")
            .field("sinks", &names)
            .field("min_acks", &self.min_acks)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Replicator {
    /// Replicator requiring `min_acks` confirmations within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Configuration`] if `min_acks` is zero or exceeds
    /// the number of sinks.
    pub fn new(sinks: Vec<Arc<dyn ReplicaSink>>, min_acks: usize, timeout: Duration) -> AuditResult<Self> {
        if min_acks == 0 || min_acks > sinks.len() {
            return Err(AuditError::Configuration(format!(
                "replication needs {min_acks} acknowledgements but {} sinks are configured",
                sinks.len()
            )));
        }
        Ok(Self {
            sinks,
            min_acks,
            timeout,
            alerts: Alerter::new(),
        })
    }

    /// Where quorum failures are reported.
    #[must_use]
    pub fn with_alerter(mut self, alerts: Alerter) -> Self {
        self.alerts = alerts;
        self
    }

    /// Acknowledgements required.
    #[must_use]
    pub fn min_acks(&self) -> usize {
        self.min_acks
    }

    /// Push `entry` to every sink concurrently and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Replication`] if fewer than `min_acks` sinks
    /// confirmed in time.
    pub async fn replicate(&self, entry: &AuditEntry) -> AuditResult<ReplicationReceipt> {
        let attempts = self.sinks.iter().map(|sink| async move {
            let result = match tokio::time::timeout(self.timeout, sink.replicate(entry)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", self.timeout.as_millis())),
            };
            (sink.name().to_owned(), result)
        });

        let mut receipt = ReplicationReceipt {
            sequence: entry.sequence,
            acknowledged: Vec::new(),
            failed: Vec::new(),
        };
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => receipt.acknowledged.push(name),
                Err(reason) => {
                    warn!(sink = %name, sequence = entry.sequence, %reason, "replica did not acknowledge");
                    receipt.failed.push((name, reason));
                },
            }
        }

        if receipt.acknowledged.len() >= self.min_acks {
            debug!(sequence = entry.sequence, acks = receipt.acknowledged.len(), "entry replicated");
            return Ok(receipt);
        }

        let detail = receipt
            .failed
            .iter()
            .map(|(name, reason)| format!("{name}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.alerts.raise(
            Alert::new(
                AlertKind::ReplicationFailed,
                format!(
                    "{} of {} required replicas acknowledged: {detail}",
                    receipt.acknowledged.len(),
                    self.min_acks
                ),
            )
            .at_sequence(entry.sequence),
        );
        Err(AuditError::Replication {
            acks: receipt.acknowledged.len(),
            required: self.min_acks,
            detail,
        })
    }
}
