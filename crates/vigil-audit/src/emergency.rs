//! Local emergency fallback file.
//!
//! Written when the primary store cannot take a batch, and by the ingestion
//! path when an entry could not even be chained. Appends are synchronous so
//! the fail-open path works without a runtime. Recovery merges the file back
//! into the chain and then retires it.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entry::{AuditEntry, RawEntry};
use crate::error::AuditResult;

/// One line of the emergency file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum EmergencyRecord {
    /// A chained entry the primary store did not confirm.
    Sequenced {
        /// The entry as chained.
        entry: AuditEntry,
    },
    /// An event that failed before it received a sequence number.
    Unsequenced {
        /// The sanitized entry.
        entry: RawEntry,
        /// Why it could not be chained.
        error: String,
    },
}

#[derive(Debug)]
enum Backend {
    File(PathBuf),
    Memory(Mutex<Vec<EmergencyRecord>>),
}

/// Append-only fallback sink.
#[derive(Debug)]
pub struct EmergencyLog {
    backend: Backend,
    // Serializes appends from the writer and the ingestion path.
    write_lock: Mutex<()>,
}

impl EmergencyLog {
    /// Emergency log backed by the file at `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Emergency log held in memory, for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(Vec::new())),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory(_) => None,
        }
    }

    /// Append `records` and sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, written or synced.
    pub fn append(&self, records: &[EmergencyRecord]) -> AuditResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match &self.backend {
            Backend::File(path) => {
                let mut buf = String::new();
                for record in records {
                    buf.push_str(&serde_json::to_string(record)?);
                    buf.push('\n');
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(buf.as_bytes())?;
                file.sync_data()?;
            },
            Backend::Memory(store) => {
                store
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(records);
            },
        }
        warn!(records = records.len(), "entries written to emergency log");
        Ok(())
    }

    /// Append chained entries as [`EmergencyRecord::Sequenced`].
    ///
    /// # Errors
    ///
    /// See [`EmergencyLog::append`].
    pub fn append_entries(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        let records: Vec<_> = entries
            .iter()
            .cloned()
            .map(|entry| EmergencyRecord::Sequenced { entry })
            .collect();
        self.append(&records)
    }

    /// Every record currently in the log, in write order.
    ///
    /// Unparseable lines are skipped with a warning; the file is best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read(&self) -> AuditResult<Vec<EmergencyRecord>> {
        match &self.backend {
            Backend::File(path) => {
                if !path.exists() {
                    return Ok(Vec::new());
                }
                let mut records = Vec::new();
                for (index, line) in BufReader::new(fs::File::open(path)?).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(record) => records.push(record),
                        Err(e) => warn!(line = index.saturating_add(1), error = %e, "skipping unreadable emergency record"),
                    }
                }
                Ok(records)
            },
            Backend::Memory(store) => Ok(store.lock().unwrap_or_else(PoisonError::into_inner).clone()),
        }
    }

    /// Move the current contents aside once they have been merged. Returns
    /// where a file was moved to.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn retire(&self) -> AuditResult<Option<PathBuf>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match &self.backend {
            Backend::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
                name.push(format!(".merged-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
                let target = path.with_file_name(name);
                fs::rename(path, &target)?;
                info!(to = %target.display(), "emergency log retired");
                Ok(Some(target))
            },
            Backend::Memory(store) => {
                store.lock().unwrap_or_else(PoisonError::into_inner).clear();
                Ok(None)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use vigil_core::{EntryId, Severity, Timestamp};

    use super::*;
    use crate::store::tests::make_chain;
    use crate::value::{EntryMetadata, Payload};

    fn unsequenced() -> EmergencyRecord {
        EmergencyRecord::Unsequenced {
            entry: RawEntry {
                id: EntryId::new(),
                timestamp: Timestamp::now(),
                level: Severity::Error,
                category: "auth".into(),
                action: "login".into(),
                actor: None,
                details: Payload::empty(),
                metadata: EntryMetadata::default(),
                references: None,
            },
            error: "store offline".into(),
        }
    }

    #[test]
    fn test_file_roundtrip_and_retire() {
        let dir = TempDir::new().unwrap();
        let log = EmergencyLog::file(dir.path().join("nested").join("emergency.jsonl"));
        let entries = make_chain(2);

        log.append_entries(&entries).unwrap();
        log.append(&[unsequenced()]).unwrap();

        let records = log.read().unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[0], EmergencyRecord::Sequenced { entry } if entry.sequence == 1));
        assert!(matches!(records[2], EmergencyRecord::Unsequenced { .. }));

        let moved = log.retire().unwrap().unwrap();
        assert!(moved.exists());
        assert!(log.read().unwrap().is_empty());
        assert!(log.retire().unwrap().is_none());
    }

    #[test]
    fn test_memory_backend() {
        let log = EmergencyLog::in_memory();
        log.append_entries(&make_chain(3)).unwrap();
        assert_eq!(log.read().unwrap().len(), 3);
        assert!(log.path().is_none());
        log.retire().unwrap();
        assert!(log.read().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emergency.jsonl");
        fs::write(&path, "garbage\n\n").unwrap();
        let log = EmergencyLog::file(&path);
        log.append(&[unsequenced()]).unwrap();
        assert_eq!(log.read().unwrap().len(), 1);
    }
}
