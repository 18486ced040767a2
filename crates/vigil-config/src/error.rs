use std::io;
use thiserror::Error;

/// Why configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config or key file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    ReadError {
        /// Offending path.
        path: String,
        /// I/O failure.
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML for the expected schema.
    #[error("{path} is not a valid vigil config: {source}")]
    ParseError {
        /// Offending path.
        path: String,
        /// Parser diagnostic.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent with another.
    #[error("invalid `{field}`: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `buffer.batch_size`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `VIGIL_*` override could not be parsed.
    #[error("bad value in {var_name}: {message}")]
    EnvError {
        /// Variable name.
        var_name: String,
        /// Parse failure.
        message: String,
    },

    /// Production deployments must be given a signing key.
    #[error("no signing key configured: set VIGIL_SIGNING_KEY or signing.key_path")]
    MissingSigningKey,
}

/// Result alias for config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
