//! Write-once daily journal.
//!
//! One `audit-YYYY-MM-DD.jsonl` file per UTC day, one entry per line. Files
//! are only ever appended to; once a day has passed they are made read-only.
//! The journal can be replayed and verified without the primary store.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};

const FILE_PREFIX: &str = "audit-";
const FILE_SUFFIX: &str = ".jsonl";

/// Appends entries to daily journal files.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Journal rooted at `dir`. The directory is created on first append.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Journal directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding entries for `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    /// Append `entries`, grouped by the UTC day of their timestamp, and sync.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any file cannot be written or synced. Lines
    /// already written to other days' files stay written.
    pub async fn append(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut by_day: BTreeMap<PathBuf, String> = BTreeMap::new();
        for entry in entries {
            let line = entry.to_json_line()?;
            let buf = by_day.entry(self.file_for(entry.timestamp.0.date_naive())).or_default();
            buf.push_str(&line);
            buf.push('\n');
        }
        let dir = self.dir.clone();
        let count = entries.len();

        tokio::task::spawn_blocking(move || -> AuditResult<()> {
            fs::create_dir_all(&dir)?;
            for (path, lines) in by_day {
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                file.write_all(lines.as_bytes())?;
                file.sync_data()?;
            }
            Ok(())
        })
        .await
        .map_err(|e| AuditError::Persistence(format!("journal task failed: {e}")))??;

        debug!(batch_len = count, dir = %self.dir.display(), "journal appended");
        Ok(())
    }

    /// Mark every journal file older than `today` read-only. Returns how many
    /// files were newly sealed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed or a file's
    /// permissions cannot be changed.
    pub fn seal_completed_days(&self, today: NaiveDate) -> AuditResult<usize> {
        let mut sealed = 0_usize;
        for (date, path) in journal_files(&self.dir)? {
            if date >= today {
                continue;
            }
            let mut perms = fs::metadata(&path)?.permissions();
            if perms.readonly() {
                continue;
            }
            perms.set_readonly(true);
            fs::set_permissions(&path, perms)?;
            sealed = sealed.saturating_add(1);
        }
        Ok(sealed)
    }
}

/// Journal files in `dir` with their dates, oldest first.
fn journal_files(dir: &Path) -> AuditResult<Vec<(NaiveDate, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for item in fs::read_dir(dir)? {
        let path = item?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        files.push((date, path));
    }
    files.sort();
    Ok(files)
}

/// Read every journal entry under `dir` in sequence order.
///
/// Duplicate lines for the same sequence collapse to the first one read. A
/// truncated final line in a file, as left by a crash mid-append, is skipped
/// with a warning.
///
/// # Errors
///
/// Returns an error if a file cannot be read or a line other than the last
/// in its file does not parse.
pub fn read_all(dir: &Path) -> AuditResult<Vec<AuditEntry>> {
    let mut entries: BTreeMap<u64, AuditEntry> = BTreeMap::new();
    for (_, path) in journal_files(dir)? {
        let lines: Vec<String> = BufReader::new(fs::File::open(&path)?)
            .lines()
            .collect::<Result<_, _>>()?;
        let last = lines.len().saturating_sub(1);
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => {
                    entries.entry(entry.sequence).or_insert(entry);
                },
                Err(e) if index == last => {
                    warn!(path = %path.display(), error = %e, "skipping truncated journal line");
                },
                Err(e) => {
                    return Err(AuditError::Persistence(format!(
                        "{}:{}: unreadable journal line: {e}",
                        path.display(),
                        index.saturating_add(1)
                    )));
                },
            }
        }
    }
    Ok(entries.into_values().collect())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::tests::make_chain;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path().join("journal"));
        let entries = make_chain(4);

        journal.append(&entries[..2]).await.unwrap();
        journal.append(&entries[2..]).await.unwrap();

        let back = read_all(journal.dir()).unwrap();
        assert_eq!(back, entries);
    }

    #[tokio::test]
    async fn test_file_named_by_day() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let entries = make_chain(1);
        journal.append(&entries).await.unwrap();

        let expected = journal.file_for(entries[0].timestamp.0.date_naive());
        assert!(expected.exists());
        assert!(expected.file_name().unwrap().to_str().unwrap().starts_with("audit-"));
    }

    #[test]
    fn test_read_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_all(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_tail_skipped() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let entries = make_chain(2);
        journal.append(&entries).await.unwrap();

        let path = journal.file_for(entries[0].timestamp.0.date_naive());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"trunc").unwrap();

        assert_eq!(read_all(dir.path()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_rejected() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let entries = make_chain(1);
        let path = journal.file_for(entries[0].timestamp.0.date_naive());
        fs::write(&path, "not json\n").unwrap();
        journal.append(&entries).await.unwrap();

        assert!(matches!(read_all(dir.path()), Err(AuditError::Persistence(_))));
    }

    #[test]
    fn test_seal_completed_days() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let old = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        fs::write(journal.file_for(old), "").unwrap();
        fs::write(journal.file_for(today), "").unwrap();

        assert_eq!(journal.seal_completed_days(today).unwrap(), 1);
        assert!(fs::metadata(journal.file_for(old)).unwrap().permissions().readonly());
        assert!(!fs::metadata(journal.file_for(today)).unwrap().permissions().readonly());
        assert_eq!(journal.seal_completed_days(today).unwrap(), 0);
    }
}
