//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vigil_core::prelude::*;` to import all essential types.

// Identity and time
pub use crate::{EntryId, Timestamp};

// Severity
pub use crate::{ParseSeverityError, Severity};

// Retry utilities
pub use crate::{RetryOutcome, RetryPolicy, retry};
