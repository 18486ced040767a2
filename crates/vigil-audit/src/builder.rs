//! Entry construction: sanitize, then seal if confidential or oversized.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_core::{EntryId, Severity, Timestamp};
use vigil_crypto::{ContentHash, SealingKey};

use crate::entry::RawEntry;
use crate::sanitize::{CONFIDENTIAL_MARKER, Sanitizer};
use crate::value::{Details, EntryMetadata, Payload, Value};

/// Purpose bound into sealed detail envelopes.
pub const SEALING_PURPOSE: &str = "audit.details";

/// Key of the placeholder written when confidential details cannot be sealed.
pub const WITHHELD_MARKER: &str = "$withheld";

/// Default serialized size above which details are sealed.
pub const DEFAULT_SEAL_THRESHOLD: usize = 8192;

/// An event as submitted by a caller, before sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Severity.
    pub level: Severity,
    /// Grouping such as `authentication`.
    pub category: String,
    /// Operation name.
    pub action: String,
    /// Who performed the action.
    pub actor: Option<String>,
    /// Unsanitized details.
    pub details: Details,
    /// Transport context.
    pub metadata: EntryMetadata,
    /// Sequence of an earlier entry this one refers to.
    pub references: Option<u64>,
    #[serde(skip)]
    coerced: Vec<String>,
}

impl AuditEvent {
    /// A new event with no actor or details.
    #[must_use]
    pub fn new(level: Severity, category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            level,
            category: category.into(),
            action: action.into(),
            actor: None,
            details: Details::new(),
            metadata: EntryMetadata::default(),
            references: None,
            coerced: Vec::new(),
        }
    }

    /// An `info` event.
    #[must_use]
    pub fn info(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, action)
    }

    /// A `warning` event.
    #[must_use]
    pub fn warning(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, action)
    }

    /// An `error` event.
    #[must_use]
    pub fn error(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, action)
    }

    /// A `critical` event. Replicated before the caller is released.
    #[must_use]
    pub fn critical(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(Severity::Critical, category, action)
    }

    /// A `security` event. Replicated before the caller is released.
    #[must_use]
    pub fn security(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(Severity::Security, category, action)
    }

    /// Set the actor.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Add one detail.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Add one detail from any serializable value.
    ///
    /// Values serde cannot express as JSON are stored as their `Debug` text
    /// and flagged in `metadata.coerced`.
    #[must_use]
    pub fn detail_serialized<T: Serialize + Debug>(mut self, key: impl Into<String>, value: &T) -> Self {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(json) => Value::from_json(json),
            Err(e) => {
                debug!(key = %key, error = %e, "coercing unserializable detail to text");
                self.coerced.push(key.clone());
                Value::Text(format!("{value:?}"))
            },
        };
        self.details.insert(key, value);
        self
    }

    /// Replace all details.
    #[must_use]
    pub fn details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    /// Mark the details confidential so they are sealed.
    #[must_use]
    pub fn confidential(mut self) -> Self {
        self.details.insert(CONFIDENTIAL_MARKER.to_owned(), Value::Bool(true));
        self
    }

    /// Replace the transport metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the session identifier.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.metadata.session_id = Some(session_id.into());
        self
    }

    /// Set the correlation identifier.
    #[must_use]
    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the origin address.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.metadata.origin = Some(origin.into());
        self
    }

    /// Set the operation duration.
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.metadata.duration_ms = Some(duration_ms);
        self
    }

    /// Refer to an earlier entry.
    #[must_use]
    pub fn references(mut self, sequence: u64) -> Self {
        self.references = Some(sequence);
        self
    }
}

/// Builds [`RawEntry`] values. Pure: no I/O, never fails.
#[derive(Clone)]
pub struct EntryBuilder {
    sanitizer: Sanitizer,
    sealing: Option<Arc<SealingKey>>,
    threshold_bytes: usize,
}

impl Default for EntryBuilder {
    fn default() -> Self {
        Self {
            sanitizer: Sanitizer::new(),
            sealing: None,
            threshold_bytes: DEFAULT_SEAL_THRESHOLD,
        }
    }
}

impl std::fmt::Debug for EntryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryBuilder")
            .field("sealing", &self.sealing.is_some())
            .field("threshold_bytes", &self.threshold_bytes)
            .finish_non_exhaustive()
    }
}

impl EntryBuilder {
    /// Builder with the default sanitizer and no sealing key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom sanitizer.
    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Seal payloads with this key.
    #[must_use]
    pub fn with_sealing_key(mut self, key: Arc<SealingKey>) -> Self {
        self.sealing = Some(key);
        self
    }

    /// Seal payloads whose serialized size exceeds `bytes`.
    #[must_use]
    pub fn with_threshold(mut self, bytes: usize) -> Self {
        self.threshold_bytes = bytes;
        self
    }

    /// Sanitize and, when required, seal an event.
    #[must_use]
    pub fn build(&self, event: AuditEvent) -> RawEntry {
        let sanitized = self.sanitizer.sanitize(event.details);
        let mut metadata = event.metadata;
        metadata.coerced.extend(event.coerced);
        metadata.coerced.extend(sanitized.coerced);

        let serialized = serde_json::to_vec(&sanitized.details).unwrap_or_default();
        let oversized = serialized.len() > self.threshold_bytes;
        let details = if sanitized.confidential || oversized {
            self.seal(sanitized.details, &serialized, sanitized.confidential)
        } else {
            Payload::Clear(sanitized.details)
        };

        RawEntry {
            id: EntryId::new(),
            timestamp: Timestamp::now(),
            level: event.level,
            category: event.category,
            action: event.action,
            actor: event.actor,
            details,
            metadata,
            references: event.references,
        }
    }

    /// Build an entry from trusted internal fields, skipping the sanitizer.
    pub(crate) fn build_trusted(&self, event: AuditEvent) -> RawEntry {
        RawEntry {
            id: EntryId::new(),
            timestamp: Timestamp::now(),
            level: event.level,
            category: event.category,
            action: event.action,
            actor: event.actor,
            details: Payload::Clear(event.details),
            metadata: event.metadata,
            references: event.references,
        }
    }

    fn seal(&self, details: Details, serialized: &[u8], confidential: bool) -> Payload {
        if let Some(key) = &self.sealing {
            match key.seal(SEALING_PURPOSE, serialized) {
                Ok(envelope) => return Payload::Sealed(envelope),
                Err(e) => warn!(error = %e, "sealing failed"),
            }
        }
        if !confidential {
            // Oversized but not confidential: keeping it clear loses nothing.
            return Payload::Clear(details);
        }
        warn!("confidential details withheld: no sealing key available");
        let mut withheld = Details::new();
        withheld.insert("reason".into(), Value::from("no sealing key"));
        withheld.insert(
            "digest".into(),
            Value::from(ContentHash::hash_with_domain(SEALING_PURPOSE, serialized).to_hex()),
        );
        withheld.insert("size".into(), Value::from(serialized.len()));
        let mut placeholder = Details::new();
        placeholder.insert(WITHHELD_MARKER.to_owned(), Value::Map(withheld));
        Payload::Clear(placeholder)
    }
}
