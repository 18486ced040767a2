//! Durable high-water mark of handed-out sequence numbers.
//!
//! The sequencer records how far it has reserved before it hands out a
//! sequence beyond the mark, in blocks of one batch. A crash between
//! reservation and flush leaves the mark ahead of the persisted head, which
//! recovery reports as a gap instead of renumbering.
//!
//! Writes are synchronous so the mark can be raised inside the sequencer's
//! critical section.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuditError, AuditResult};

#[derive(Debug, Serialize, Deserialize)]
struct Mark {
    reserved_through: u64,
    written_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Backend {
    File(PathBuf),
    Memory(Mutex<Option<u64>>),
}

/// Where the reservation mark lives.
#[derive(Debug)]
pub struct Reservations {
    backend: Backend,
}

impl Reservations {
    /// Mark kept in the file at `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    /// Mark held in memory. Survives a rebuild of the log only while the
    /// same instance is shared.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(None)),
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

    /// Highest reserved sequence, or `None` if nothing was ever reserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> AuditResult<Option<u64>> {
        match &self.backend {
            Backend::Memory(mark) => Ok(*mark.lock().unwrap_or_else(PoisonError::into_inner)),
            Backend::File(path) => match fs::read(path) {
                Ok(bytes) => {
                    let mark: Mark = serde_json::from_slice(&bytes)?;
                    Ok(Some(mark.reserved_through))
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Replace the mark with `through` and sync it to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the mark cannot be written durably.
    pub fn store(&self, through: u64) -> AuditResult<()> {
        match &self.backend {
            Backend::Memory(mark) => {
                *mark.lock().unwrap_or_else(PoisonError::into_inner) = Some(through);
            },
            Backend::File(path) => {
                let bytes = serde_json::to_vec(&Mark {
                    reserved_through: through,
                    written_at: Utc::now(),
                })?;
                write_atomic(path, &bytes)?;
            },
        }
        debug!(through, "reservation mark written");
        Ok(())
    }
}

fn write_atomic(target: &Path, bytes: &[u8]) -> AuditResult<()> {
    let dir = target
        .parent()
        .ok_or_else(|| AuditError::Configuration(format!("{} has no parent", target.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp_name = target.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    // Directory sync is best effort; not every platform supports it.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_mark_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("reservation.json");

        let marks = Reservations::file(&path);
        assert_eq!(marks.load().unwrap(), None);
        marks.store(16).unwrap();
        marks.store(32).unwrap();

        assert_eq!(Reservations::file(&path).load().unwrap(), Some(32));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_memory_mark() {
        let marks = Reservations::in_memory();
        assert_eq!(marks.load().unwrap(), None);
        marks.store(7).unwrap();
        assert_eq!(marks.load().unwrap(), Some(7));
        assert!(marks.path().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reservation.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(Reservations::file(&path).load(), Err(AuditError::Serialization(_))));
    }
}
