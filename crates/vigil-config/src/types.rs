use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signing key material and trusted historical keys.
    pub signing: SigningSection,
    /// Confidential payload sealing.
    pub sealing: SealingSection,
    /// Micro-batching buffer.
    pub buffer: BufferSection,
    /// Storage locations and retry policy.
    pub persistence: PersistenceSection,
    /// Retention windows and archiving cadence.
    pub retention: RetentionSection,
    /// Scheduled integrity verification.
    pub verification: VerificationSection,
    /// Critical-event replication.
    pub replication: ReplicationSection,
    /// Log output.
    pub logging: LoggingSection,
    /// Secrets resolved from the environment or key files. Never serialized.
    #[serde(skip)]
    pub secrets: Secrets,
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// A secret string whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret. Keep the borrow short.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Secret key material resolved at load time.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Base64 ed25519 signing secret.
    pub signing_key: Option<Secret>,
    /// Base64 AES-256 sealing master secret.
    pub sealing_key: Option<Secret>,
}

// ---------------------------------------------------------------------------
// SigningSection
// ---------------------------------------------------------------------------

/// Deployment environment. Only development may run with an ephemeral key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// A missing signing key halts startup.
    #[default]
    Production,
    /// A missing signing key is replaced by a logged, ephemeral key.
    Development,
}

/// A public key that signed an earlier era of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedKey {
    /// Key version recorded in entries signed by this key.
    pub version: u32,
    /// Base64 ed25519 public key.
    pub public_key: String,
}

/// Signing key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSection {
    /// Deployment environment.
    pub environment: Environment,
    /// Version of the active signing key.
    pub key_version: u32,
    /// File holding the base64 signing secret. `VIGIL_SIGNING_KEY` wins if set.
    pub key_path: Option<String>,
    /// Base64 public half of the active key, for tooling that only verifies.
    pub public_key: Option<String>,
    /// Public keys of earlier versions.
    pub trusted_keys: Vec<TrustedKey>,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            key_version: 1,
            key_path: None,
            public_key: None,
            trusted_keys: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// SealingSection
// ---------------------------------------------------------------------------

/// Payload sealing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingSection {
    /// Serialized payload size above which details are sealed.
    pub threshold_bytes: usize,
    /// File holding the base64 sealing secret. `VIGIL_SEALING_KEY` wins if set.
    pub key_path: Option<String>,
}

impl Default for SealingSection {
    fn default() -> Self {
        Self {
            threshold_bytes: 8192,
            key_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// BufferSection
// ---------------------------------------------------------------------------

/// Micro-batching thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    /// Entries that trigger an immediate flush.
    pub batch_size: usize,
    /// Longest an entry may wait in the buffer.
    pub flush_interval_ms: u64,
    /// Bound on the final flush at shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            batch_size: 256,
            flush_interval_ms: 1000,
            shutdown_grace_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// PersistenceSection
// ---------------------------------------------------------------------------

/// Backoff for primary store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_delay_ms: u64,
    /// Cap on any retry delay.
    pub max_delay_ms: u64,
    /// Delay growth factor.
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Storage locations. Unset paths derive from `data_dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    /// Root for every derived path. Defaults to the platform data directory.
    pub data_dir: Option<String>,
    /// Daily write-once journal files.
    pub journal_dir: Option<String>,
    /// Emergency fallback file.
    pub emergency_path: Option<String>,
    /// Cold storage for archived entries.
    pub cold_dir: Option<String>,
    /// Primary store write retries.
    pub retry: RetrySection,
}

/// Every on-disk location, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Hot primary store (entries and checkpoint).
    pub hot_dir: PathBuf,
    /// Cold archive store.
    pub cold_dir: PathBuf,
    /// Daily journal directory.
    pub journal_dir: PathBuf,
    /// Emergency fallback file.
    pub emergency_path: PathBuf,
    /// Forensic replica file.
    pub forensic_path: PathBuf,
    /// Durable mark of the highest reserved sequence.
    pub reservation_path: PathBuf,
}

// ---------------------------------------------------------------------------
// RetentionSection
// ---------------------------------------------------------------------------

/// Retention windows and archive cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Days info/warning/error entries stay hot.
    pub standard_days: u32,
    /// Days critical/security entries stay hot.
    pub elevated_days: u32,
    /// Seconds between archive passes.
    pub archive_interval_secs: u64,
    /// Most entries moved per pass.
    pub archive_batch_limit: usize,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            standard_days: 90,
            elevated_days: 2555,
            archive_interval_secs: 3600,
            archive_batch_limit: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// VerificationSection
// ---------------------------------------------------------------------------

/// Scheduled verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    /// Seconds between verification passes. 0 disables the job.
    pub interval_secs: u64,
    /// Number of most recent entries each pass covers.
    pub window: u64,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            window: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// ReplicationSection
// ---------------------------------------------------------------------------

/// Synchronous fan-out for critical and security entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    /// Forensic replica file. Defaults to `{data_dir}/forensic.jsonl`.
    pub forensic_path: Option<String>,
    /// Acknowledgements required before the caller is released.
    pub min_acks: usize,
    /// Per-sink timeout.
    pub timeout_ms: u64,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            forensic_path: None,
            min_acks: 1,
            timeout_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Per-target directives such as `vigil_audit=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
