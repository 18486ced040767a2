//! Filtered, checksummed exports.
//!
//! An export reads cold storage and the hot store together, in sequence
//! order. A hole in the scanned range fails the export rather than producing
//! a silently truncated bundle, unless a gap marker in the chain accounts
//! for it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use vigil_core::Severity;

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};
use crate::recovery::SequenceGap;
use crate::store::{EntryStore, merged_bounds, read_merged};

const PAGE_SIZE: u64 = 1024;

/// Interchange format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One JSON object per line.
    #[default]
    Jsonl,
    /// A single JSON array.
    Json,
    /// Comma-separated values with a header row.
    Csv,
}

impl ExportFormat {
    /// Lowercase name, also the file extension.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(AuditError::Export(format!("unknown export format: {other}"))),
        }
    }
}

/// Which entries to export. Every criterion is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportFilter {
    /// Lowest sequence, inclusive.
    pub from_sequence: Option<u64>,
    /// Highest sequence, inclusive.
    pub to_sequence: Option<u64>,
    /// Earliest timestamp, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Latest timestamp, exclusive.
    pub until: Option<DateTime<Utc>>,
    /// Minimum severity.
    pub min_level: Option<Severity>,
    /// Allowed categories; empty allows all.
    pub categories: Vec<String>,
    /// Exact actor.
    pub actor: Option<String>,
}

impl ExportFilter {
    /// Filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `from..=to`.
    #[must_use]
    pub fn sequences(mut self, from: u64, to: u64) -> Self {
        self.from_sequence = Some(from);
        self.to_sequence = Some(to);
        self
    }

    /// Restrict to `since <= timestamp < until`.
    #[must_use]
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Restrict to `level` and above.
    #[must_use]
    pub fn min_level(mut self, level: Severity) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Allow `category`.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Restrict to one actor.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Whether `entry` passes every non-sequence criterion.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let ts = entry.timestamp.0;
        self.since.is_none_or(|since| ts >= since)
            && self.until.is_none_or(|until| ts < until)
            && self.min_level.is_none_or(|min| entry.level >= min)
            && (self.categories.is_empty() || self.categories.iter().any(|c| *c == entry.category))
            && self
                .actor
                .as_deref()
                .is_none_or(|actor| entry.actor.as_deref() == Some(actor))
    }

    fn has_explicit_range(&self) -> bool {
        self.from_sequence.is_some() || self.to_sequence.is_some()
    }
}

/// An encoded export with its integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    /// Encoding of `bytes`.
    pub format: ExportFormat,
    /// Encoded entries.
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`.
    pub checksum: String,
    /// Entries included.
    pub entry_count: u64,
    /// Sequence of the first included entry.
    pub first_sequence: Option<u64>,
    /// Sequence of the last included entry.
    pub last_sequence: Option<u64>,
    /// When the export was produced.
    pub generated_at: DateTime<Utc>,
}

impl ExportBundle {
    /// Whether `bytes` still match `checksum`.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        sha256_hex(&self.bytes) == self.checksum
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Produces exports across hot and cold storage.
pub struct Exporter {
    hot: Arc<dyn EntryStore>,
    cold: Option<Arc<dyn EntryStore>>,
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("cold", &self.cold.is_some())
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Exporter over `hot` and optional `cold` storage.
    #[must_use]
    pub fn new(hot: Arc<dyn EntryStore>, cold: Option<Arc<dyn EntryStore>>) -> Self {
        Self { hot, cold }
    }

    /// Export every entry matching `filter`, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Export`] if the scanned range has a hole or an
    /// explicit sequence range reaches beyond what is stored, or a store
    /// error.
    pub async fn export(&self, filter: &ExportFilter, format: ExportFormat) -> AuditResult<ExportBundle> {
        let entries = self.collect(filter).await?;
        let bytes = encode(&entries, format)?;
        let bundle = ExportBundle {
            format,
            checksum: sha256_hex(&bytes),
            bytes,
            entry_count: u64::try_from(entries.len()).unwrap_or(u64::MAX),
            first_sequence: entries.first().map(|e| e.sequence),
            last_sequence: entries.last().map(|e| e.sequence),
            generated_at: Utc::now(),
        };
        info!(
            format = %format,
            entries = bundle.entry_count,
            checksum = %bundle.checksum,
            "export produced"
        );
        Ok(bundle)
    }

    async fn collect(&self, filter: &ExportFilter) -> AuditResult<Vec<AuditEntry>> {
        let cold = self.cold.as_deref();
        let Some((low, high)) = merged_bounds(self.hot.as_ref(), cold).await? else {
            if filter.has_explicit_range() {
                return Err(AuditError::Export("requested range but no entries are stored".to_owned()));
            }
            return Ok(Vec::new());
        };
        let start = filter.from_sequence.unwrap_or(low);
        let end = filter.to_sequence.unwrap_or(high);
        if start > end {
            return Err(AuditError::Export(format!("empty sequence range {start}..={end}")));
        }
        if start < low || end > high {
            return Err(AuditError::Export(format!(
                "requested {start}..={end} but only {low}..={high} is stored"
            )));
        }

        let mut out = Vec::new();
        let mut expected = start;
        let mut page_start = start;
        while page_start <= end {
            let page_end = page_start.saturating_add(PAGE_SIZE.saturating_sub(1)).min(end);
            for entry in read_merged(self.hot.as_ref(), cold, page_start, page_end).await? {
                if entry.sequence != expected && !SequenceGap::accounts_for(&entry, expected) {
                    return Err(missing(expected));
                }
                expected = entry.sequence.saturating_add(1);
                if filter.matches(&entry) {
                    out.push(entry);
                }
            }
            match page_end.checked_add(1) {
                Some(next) => page_start = next,
                None => break,
            }
        }
        if expected <= end {
            return Err(missing(expected));
        }
        Ok(out)
    }
}

fn missing(sequence: u64) -> AuditError {
    AuditError::Export(format!("sequence {sequence} is missing from both hot and cold storage"))
}

fn encode(entries: &[AuditEntry], format: ExportFormat) -> AuditResult<Vec<u8>> {
    match format {
        ExportFormat::Jsonl => {
            let mut out = Vec::new();
            for entry in entries {
                out.extend_from_slice(entry.to_json_line()?.as_bytes());
                out.push(b'\n');
            }
            Ok(out)
        },
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(entries)?),
        ExportFormat::Csv => encode_csv(entries),
    }
}

const CSV_HEADER: [&str; 14] = [
    "sequence",
    "id",
    "timestamp",
    "level",
    "category",
    "action",
    "actor",
    "details",
    "metadata",
    "references",
    "previous_hash",
    "content_hash",
    "key_version",
    "signature",
];

fn encode_csv(entries: &[AuditEntry]) -> AuditResult<Vec<u8>> {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|h| (*h).to_owned()));
    for entry in entries {
        push_row(
            &mut out,
            [
                entry.sequence.to_string(),
                entry.id.0.to_string(),
                entry.timestamp.canonical(),
                entry.level.as_str().to_owned(),
                entry.category.clone(),
                entry.action.clone(),
                entry.actor.clone().unwrap_or_default(),
                serde_json::to_string(&entry.details)?,
                serde_json::to_string(&entry.metadata)?,
                entry.references.map(|r| r.to_string()).unwrap_or_default(),
                entry.previous_hash.to_hex(),
                entry.content_hash.to_hex(),
                entry.key_version.0.to_string(),
                entry.signature.to_base64(),
            ],
        );
    }
    Ok(out.into_bytes())
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(&field));
    }
    out.push_str("\r\n");
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEntryStore;
    use crate::store::tests::make_chain;

    async fn populated(count: usize) -> (Arc<MemoryEntryStore>, Vec<AuditEntry>) {
        let entries = make_chain(count);
        let hot = Arc::new(MemoryEntryStore::new());
        hot.insert_batch(&entries).await.unwrap();
        (hot, entries)
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("ndjson".parse::<ExportFormat>().unwrap(), ExportFormat::Jsonl);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_jsonl_export_with_checksum() {
        let (hot, entries) = populated(5).await;
        let exporter = Exporter::new(hot, None);

        let bundle = exporter.export(&ExportFilter::new(), ExportFormat::Jsonl).await.unwrap();
        assert_eq!(bundle.entry_count, 5);
        assert_eq!(bundle.first_sequence, Some(1));
        assert_eq!(bundle.last_sequence, Some(5));
        assert!(bundle.verify_checksum());

        let text = String::from_utf8(bundle.bytes).unwrap();
        let back: Vec<AuditEntry> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(back, entries);
    }

    #[tokio::test]
    async fn test_merges_cold_and_hot() {
        let entries = make_chain(6);
        let hot = Arc::new(MemoryEntryStore::new());
        let cold = Arc::new(MemoryEntryStore::new());
        cold.insert_batch(&entries[..3]).await.unwrap();
        hot.insert_batch(&entries[3..]).await.unwrap();
        let exporter = Exporter::new(hot, Some(cold as Arc<dyn EntryStore>));

        let bundle = exporter
            .export(&ExportFilter::new().sequences(2, 5), ExportFormat::Json)
            .await
            .unwrap();
        let back: Vec<AuditEntry> = serde_json::from_slice(&bundle.bytes).unwrap();
        assert_eq!(back.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_hole_is_error() {
        let entries = make_chain(5);
        let hot = Arc::new(MemoryEntryStore::new());
        hot.insert_batch(&entries[..2]).await.unwrap();
        hot.insert_batch(&entries[3..]).await.unwrap();
        let exporter = Exporter::new(hot, None);

        let err = exporter.export(&ExportFilter::new(), ExportFormat::Jsonl).await.unwrap_err();
        assert!(matches!(err, AuditError::Export(msg) if msg.contains("sequence 3")));
    }

    #[tokio::test]
    async fn test_range_beyond_store_is_error() {
        let (hot, _) = populated(3).await;
        let exporter = Exporter::new(hot, None);
        let result = exporter
            .export(&ExportFilter::new().sequences(1, 10), ExportFormat::Jsonl)
            .await;
        assert!(matches!(result, Err(AuditError::Export(_))));
    }

    #[tokio::test]
    async fn test_csv_has_header_and_rows() {
        let (hot, _) = populated(2).await;
        let exporter = Exporter::new(hot, None);
        let bundle = exporter.export(&ExportFilter::new(), ExportFormat::Csv).await.unwrap();
        let text = String::from_utf8(bundle.bytes).unwrap();
        let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sequence,id,timestamp"));
    }

    #[tokio::test]
    async fn test_filter_by_level_and_category() {
        let (hot, _) = populated(3).await;
        let exporter = Exporter::new(hot, None);
        let none = exporter
            .export(&ExportFilter::new().min_level(Severity::Critical), ExportFormat::Jsonl)
            .await
            .unwrap();
        assert_eq!(none.entry_count, 0);
        let all = exporter
            .export(&ExportFilter::new().category("test"), ExportFormat::Jsonl)
            .await
            .unwrap();
        assert_eq!(all.entry_count, 3);
    }
}
