//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vigil_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Events and entries
pub use crate::{AuditEntry, AuditEvent, Details, Payload, Value};

// Log
pub use crate::{AuditLog, AuditLogBuilder, AuditScheduler, Ingested, Schedule};

// Storage
pub use crate::{EntryStore, KvEntryStore, MemoryEntryStore, Reservations};

// Replication
pub use crate::{FileReplica, ReplicaSink};

// Verification and export
pub use crate::{ExportFilter, ExportFormat, IntegrityIssue, VerificationReport};

// Alerts
pub use crate::{Alert, AlertHook, AlertKind};
