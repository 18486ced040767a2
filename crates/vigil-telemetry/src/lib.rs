//! Vigil Telemetry - structured logging for the audit subsystem.
//!
//! Application logs are separate from the audit trail itself: they describe
//! what the logger is doing (flushes, retries, alerts), never the audited events.
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), vigil_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("vigil_audit=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("audit log online");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
