//! CLI command implementations.

pub(crate) mod config;
pub(crate) mod export;
pub(crate) mod keys;
pub(crate) mod verify;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use vigil_audit::{CheckpointStore, EntryStore, KvEntryStore};
use vigil_config::Config;
use vigil_crypto::{KeyPair, KeyRing, KeyVersion, PublicKey};
use vigil_storage::{FileKvStore, KvStore};

/// Hot store, cold store when present, and the checkpoint, all opened read-only.
pub(crate) struct Stores {
    pub(crate) hot: Arc<dyn EntryStore>,
    pub(crate) cold: Option<Arc<dyn EntryStore>>,
    pub(crate) checkpoints: CheckpointStore,
}

/// Open the configured stores without taking the writer lock.
pub(crate) fn open_stores(config: &Config) -> Result<Stores> {
    let paths = config.paths();
    let hot_kv: Arc<dyn KvStore> = Arc::new(
        FileKvStore::open_read_only(&paths.hot_dir)
            .with_context(|| format!("no audit store at {}", paths.hot_dir.display()))?,
    );
    let checkpoints = CheckpointStore::new(Arc::clone(&hot_kv))?;
    let hot: Arc<dyn EntryStore> = Arc::new(KvEntryStore::new(hot_kv)?);

    let cold = if paths.cold_dir.is_dir() {
        let cold_kv: Arc<dyn KvStore> = Arc::new(FileKvStore::open_read_only(&paths.cold_dir)?);
        let cold: Arc<dyn EntryStore> = Arc::new(KvEntryStore::new(cold_kv)?);
        Some(cold)
    } else {
        None
    };
    debug!(hot = %paths.hot_dir.display(), cold = cold.is_some(), "opened audit stores read-only");
    Ok(Stores { hot, cold, checkpoints })
}

/// Public keys the configuration trusts: every historical era plus the
/// active key, taken from `signing.public_key` or derived from the secret.
pub(crate) fn trusted_keys(config: &Config) -> Result<KeyRing> {
    let mut ring = KeyRing::new();
    for key in &config.signing.trusted_keys {
        let public = PublicKey::from_base64(&key.public_key)
            .with_context(|| format!("trusted key version {} is malformed", key.version))?;
        ring.insert(KeyVersion(key.version), public)?;
    }

    let active = match (&config.signing.public_key, &config.secrets.signing_key) {
        (Some(encoded), _) => Some(PublicKey::from_base64(encoded).context("signing.public_key is malformed")?),
        (None, Some(secret)) => Some(
            KeyPair::from_base64_secret(secret.expose())
                .context("signing key is malformed")?
                .public_key(),
        ),
        (None, None) => None,
    };
    if let Some(public) = active {
        let version = KeyVersion(config.signing.key_version);
        if ring.get(version) != Some(&public) {
            ring.insert(version, public)?;
        }
    }
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use vigil_config::{Secret, TrustedKey};

    use super::*;

    #[test]
    fn test_trusted_keys_include_active_key() {
        let old = KeyPair::generate();
        let active = KeyPair::generate();
        let mut config = Config::default();
        config.signing.key_version = 2;
        config.signing.trusted_keys = vec![TrustedKey {
            version: 1,
            public_key: old.public_key().to_base64(),
        }];
        config.secrets.signing_key = Some(Secret::new(active.secret_key_base64().as_str()));

        let ring = trusted_keys(&config).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get(KeyVersion(2)), Some(&active.public_key()));
    }

    #[test]
    fn test_malformed_trusted_key_rejected() {
        let mut config = Config::default();
        config.signing.trusted_keys = vec![TrustedKey {
            version: 1,
            public_key: "not base64!".into(),
        }];
        assert!(trusted_keys(&config).is_err());
    }

    #[test]
    fn test_missing_store_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.persistence.data_dir = Some(dir.path().join("absent").display().to_string());
        assert!(open_stores(&config).is_err());
    }
}
