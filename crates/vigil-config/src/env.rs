//! Environment variable overrides and secret resolution.
//!
//! `VIGIL_*` variables override whatever the files set. Lookups go through a
//! caller-supplied function so tests never touch the process environment.

use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, Secret, Secrets};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "VIGIL_ENVIRONMENT",
        field_path: "signing.environment",
    },
    EnvMapping {
        var_name: "VIGIL_KEY_VERSION",
        field_path: "signing.key_version",
    },
    EnvMapping {
        var_name: "VIGIL_SIGNING_KEY_PATH",
        field_path: "signing.key_path",
    },
    EnvMapping {
        var_name: "VIGIL_BATCH_SIZE",
        field_path: "buffer.batch_size",
    },
    EnvMapping {
        var_name: "VIGIL_FLUSH_INTERVAL_MS",
        field_path: "buffer.flush_interval_ms",
    },
    EnvMapping {
        var_name: "VIGIL_DATA_DIR",
        field_path: "persistence.data_dir",
    },
    EnvMapping {
        var_name: "VIGIL_EMERGENCY_PATH",
        field_path: "persistence.emergency_path",
    },
    EnvMapping {
        var_name: "VIGIL_RETENTION_DAYS",
        field_path: "retention.standard_days",
    },
    EnvMapping {
        var_name: "VIGIL_ELEVATED_RETENTION_DAYS",
        field_path: "retention.elevated_days",
    },
    EnvMapping {
        var_name: "VIGIL_LOG_LEVEL",
        field_path: "logging.level",
    },
];

/// Secret-bearing variables, read separately and never written into the tree.
pub const SIGNING_KEY_VAR: &str = "VIGIL_SIGNING_KEY";
/// Sealing master secret variable.
pub const SEALING_KEY_VAR: &str = "VIGIL_SEALING_KEY";

/// Apply every set `VIGIL_*` variable onto the merged TOML tree.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a variable targets a path that is not a table.
pub(crate) fn apply_overrides<F>(tree: &mut toml::Value, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    for mapping in ENV_MAPPINGS {
        let Some(raw) = lookup(mapping.var_name) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        debug!(var = mapping.var_name, field = mapping.field_path, "applying env override");
        set_path(tree, mapping.field_path, parse_scalar(raw.trim())).map_err(|message| ConfigError::EnvError {
            var_name: mapping.var_name.to_owned(),
            message,
        })?;
    }
    Ok(())
}

/// Integers and booleans keep their type; everything else is a string.
fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(int) = raw.parse::<i64>() {
        return toml::Value::Integer(int);
    }
    match raw {
        "true" => toml::Value::Boolean(true),
        "false" => toml::Value::Boolean(false),
        other => toml::Value::String(other.to_owned()),
    }
}

fn set_path(tree: &mut toml::Value, path: &str, value: toml::Value) -> Result<(), String> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().ok_or_else(|| "empty field path".to_owned())?;
    let mut cursor = tree;
    for segment in segments {
        let table = cursor
            .as_table_mut()
            .ok_or_else(|| format!("'{segment}' parent is not a table"))?;
        cursor = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    cursor
        .as_table_mut()
        .ok_or_else(|| format!("'{path}' parent is not a table"))?
        .insert(leaf.to_owned(), value);
    Ok(())
}

/// Resolve signing and sealing secrets. Environment variables win over key files.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] if a configured key file cannot be read.
pub(crate) fn resolve_secrets<F>(config: &Config, lookup: &F) -> ConfigResult<Secrets>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Secrets {
        signing_key: resolve_one(lookup(SIGNING_KEY_VAR), config.signing.key_path.as_deref())?,
        sealing_key: resolve_one(lookup(SEALING_KEY_VAR), config.sealing.key_path.as_deref())?,
    })
}

fn resolve_one(from_env: Option<String>, key_path: Option<&str>) -> ConfigResult<Option<Secret>> {
    if let Some(value) = from_env.filter(|v| !v.trim().is_empty()) {
        return Ok(Some(Secret::new(value.trim())));
    }
    let Some(path) = key_path else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::ReadError {
        path: path.to_owned(),
        source,
    })?;
    let trimmed = content.trim();
    Ok((!trimmed.is_empty()).then(|| Secret::new(trimmed)))
}
