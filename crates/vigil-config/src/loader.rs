//! Layered loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Deep-merge the user file, if any
//! 3. Apply `VIGIL_*` environment overrides
//! 4. Deserialize into [`Config`]
//! 5. Resolve secrets
//! 6. Validate

use std::path::Path;

use tracing::debug;

use crate::env;
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("../defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration from defaults, an optional file and the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is malformed, a key file is
/// unreadable, or validation fails.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Like [`load`], reading variables through `lookup` instead of the process environment.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> ConfigResult<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut tree: toml::Value = toml::from_str(DEFAULTS_TOML).map_err(|source| ConfigError::ParseError {
        path: "<defaults>".to_owned(),
        source,
    })?;

    if let Some(path) = path {
        let layer = read_file(path)?;
        deep_merge(&mut tree, layer);
        debug!(path = %path.display(), "merged config file");
    }

    env::apply_overrides(&mut tree, &lookup)?;

    let mut config: Config = tree.try_into().map_err(|source| ConfigError::ParseError {
        path: path.map_or_else(|| "<defaults>".to_owned(), |p| p.display().to_string()),
        source,
    })?;
    config.secrets = env::resolve_secrets(&config, &lookup)?;

    validate::validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.display().to_string(),
        source,
    })?;
    if u64::try_from(content.len()).unwrap_or(u64::MAX) > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }
    toml::from_str(&content).map_err(|source| ConfigError::ParseError {
        path: path.display().to_string(),
        source,
    })
}

/// Tables merge key by key; any other value replaces the base.
fn deep_merge(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (base, layer) => *base = layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Environment;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_load() {
        let config = load_with_env(None, no_env).unwrap();
        assert_eq!(config.buffer.batch_size, 256);
        assert_eq!(config.retention.standard_days, 90);
        assert_eq!(config.signing.environment, Environment::Production);
        assert!(config.secrets.signing_key.is_none());
    }

    #[test]
    fn test_file_layer_merges_partially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[buffer]\nbatch_size = 32\n").unwrap();

        let config = load_with_env(Some(&path), no_env).unwrap();
        assert_eq!(config.buffer.batch_size, 32);
        // Untouched sibling keeps its default.
        assert_eq!(config.buffer.flush_interval_ms, 1000);
    }

    #[test]
    fn test_env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[buffer]\nbatch_size = 32\n").unwrap();

        let config = load_with_env(Some(&path), |name| (name == "VIGIL_BATCH_SIZE").then(|| "8".to_owned())).unwrap();
        assert_eq!(config.buffer.batch_size, 8);
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[buffer\n").unwrap();
        assert!(matches!(load_with_env(Some(&path), no_env), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[buffer]\nbatch_size = 0\n").unwrap();
        assert!(matches!(
            load_with_env(Some(&path), no_env),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_secret_debug_redacted() {
        let config = load_with_env(None, |name| (name == env::SIGNING_KEY_VAR).then(|| "c2VjcmV0".to_owned())).unwrap();
        let debug = format!("{:?}", config.secrets);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("REDACTED"));
    }
}
