//! Vigil Config - layered configuration for the audit subsystem.
//!
//! # Precedence (highest wins)
//!
//! 1. `VIGIL_*` environment variables
//! 2. The user config file passed to [`Config::load`]
//! 3. Embedded defaults
//!
//! Secrets never live in the TOML tree. They come from `VIGIL_SIGNING_KEY` /
//! `VIGIL_SEALING_KEY` or the files named by `signing.key_path` /
//! `sealing.key_path`, and are held in [`Secrets`] with redacted `Debug`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Layered loading.
pub mod loader;
/// Configuration types.
pub mod types;
/// Configuration validation.
pub mod validate;

use std::path::{Path, PathBuf};

pub use env::{SEALING_KEY_VAR, SIGNING_KEY_VAR};
pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load from embedded defaults, an optional file and the process environment.
    ///
    /// # Errors
    ///
    /// See [`loader::load`].
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        loader::load(path)
    }

    /// Whether this deployment may run on an ephemeral signing key.
    #[must_use]
    pub fn allows_ephemeral_key(&self) -> bool {
        self.signing.environment == Environment::Development
    }

    /// The signing secret, or [`ConfigError::MissingSigningKey`] when absent
    /// outside development. `Ok(None)` means an ephemeral key is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSigningKey`] in production without a key.
    pub fn require_signing_key(&self) -> ConfigResult<Option<&Secret>> {
        match (&self.secrets.signing_key, self.allows_ephemeral_key()) {
            (Some(secret), _) => Ok(Some(secret)),
            (None, true) => Ok(None),
            (None, false) => Err(ConfigError::MissingSigningKey),
        }
    }

    /// Resolve every on-disk location, deriving unset ones from `data_dir`.
    #[must_use]
    pub fn paths(&self) -> ResolvedPaths {
        let data_dir = self
            .persistence
            .data_dir
            .as_deref()
            .map(PathBuf::from)
            .or_else(|| {
                directories::ProjectDirs::from("", "", "vigil").map(|dirs| dirs.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from("vigil-data"));

        let or_default = |configured: Option<&str>, fallback: &str| {
            configured.map_or_else(|| data_dir.join(fallback), PathBuf::from)
        };

        ResolvedPaths {
            hot_dir: data_dir.join("hot"),
            cold_dir: or_default(self.persistence.cold_dir.as_deref(), "cold"),
            journal_dir: or_default(self.persistence.journal_dir.as_deref(), "journal"),
            emergency_path: or_default(self.persistence.emergency_path.as_deref(), "emergency.jsonl"),
            forensic_path: or_default(self.replication.forensic_path.as_deref(), "forensic.jsonl"),
            reservation_path: data_dir.join("reservation.json"),
        }
    }
}
