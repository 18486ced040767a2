//! Vigil Core - shared vocabulary for the vigil audit subsystem.
//!
//! This crate provides:
//! - Entry identifiers and timestamps
//! - The ordered [`Severity`] scale
//! - Retry utilities with exponential backoff

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod retry;
pub mod types;

pub use retry::{RetryOutcome, RetryPolicy, retry};
pub use types::{EntryId, ParseSeverityError, Severity, Timestamp};
