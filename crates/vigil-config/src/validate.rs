//! Structural validation of a merged [`Config`].
//!
//! Key presence is not checked here: read-only tooling loads the same config
//! without a signing secret. Writers call [`Config::require_signing_key`].
//!
//! [`Config::require_signing_key`]: crate::Config::require_signing_key

use std::collections::BTreeSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate every section.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] naming the first offending field.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_signing(config)?;
    validate_sealing(config)?;
    validate_buffer(config)?;
    validate_retry(config)?;
    validate_retention(config)?;
    validate_replication(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_signing(config: &Config) -> ConfigResult<()> {
    let signing = &config.signing;
    if signing.key_version == 0 {
        return Err(invalid("signing.key_version", "key versions start at 1"));
    }
    let mut seen = BTreeSet::new();
    for trusted in &signing.trusted_keys {
        if trusted.version >= signing.key_version {
            return Err(invalid(
                "signing.trusted_keys",
                format!(
                    "trusted key v{} must be older than the active key v{}",
                    trusted.version, signing.key_version
                ),
            ));
        }
        if !seen.insert(trusted.version) {
            return Err(invalid(
                "signing.trusted_keys",
                format!("duplicate trusted key version v{}", trusted.version),
            ));
        }
        if trusted.public_key.trim().is_empty() {
            return Err(invalid("signing.trusted_keys", "public_key must not be empty"));
        }
    }
    Ok(())
}

fn validate_sealing(config: &Config) -> ConfigResult<()> {
    if config.sealing.threshold_bytes == 0 {
        return Err(invalid("sealing.threshold_bytes", "must be greater than zero"));
    }
    Ok(())
}

fn validate_buffer(config: &Config) -> ConfigResult<()> {
    let buffer = &config.buffer;
    if buffer.batch_size == 0 {
        return Err(invalid("buffer.batch_size", "must be greater than zero"));
    }
    if buffer.flush_interval_ms == 0 {
        return Err(invalid("buffer.flush_interval_ms", "must be greater than zero"));
    }
    if buffer.shutdown_grace_ms == 0 {
        return Err(invalid("buffer.shutdown_grace_ms", "must be greater than zero"));
    }
    Ok(())
}

fn validate_retry(config: &Config) -> ConfigResult<()> {
    let retry = &config.persistence.retry;
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(invalid(
            "persistence.retry.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(invalid(
            "persistence.retry.max_delay_ms",
            "must not be smaller than initial_delay_ms",
        ));
    }
    Ok(())
}

fn validate_retention(config: &Config) -> ConfigResult<()> {
    let retention = &config.retention;
    if retention.standard_days == 0 {
        return Err(invalid("retention.standard_days", "must be at least one day"));
    }
    if retention.elevated_days < retention.standard_days {
        return Err(invalid(
            "retention.elevated_days",
            "critical and security entries must be kept at least as long as the rest",
        ));
    }
    if retention.archive_batch_limit == 0 {
        return Err(invalid("retention.archive_batch_limit", "must be greater than zero"));
    }
    Ok(())
}

fn validate_replication(config: &Config) -> ConfigResult<()> {
    if config.replication.min_acks == 0 {
        return Err(invalid("replication.min_acks", "at least one replica must acknowledge"));
    }
    if config.replication.timeout_ms == 0 {
        return Err(invalid("replication.timeout_ms", "must be greater than zero"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}', expected one of {LOG_LEVELS:?}", config.logging.level),
        ));
    }
    let format = config.logging.format.to_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}', expected one of {LOG_FORMATS:?}", config.logging.format),
        ));
    }
    Ok(())
}
