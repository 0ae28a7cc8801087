//! Engine events for external observers.

use std::fmt;

/// Something an operator may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A search index push failed; the record save itself stood.
    IndexingFailed {
        /// Record primary key
        record_id: String,
        /// Index name
        index: String,
        /// Rendered error
        error: String,
    },
    /// A stored envelope could not be opened and was left encrypted.
    DecryptionFailed {
        /// Record type identifier
        record_type: String,
        /// Field name
        field: String,
        /// Record primary key
        record_id: String,
    },
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexingFailed { record_id, index, error } => {
                write!(f, "indexing record {record_id} into {index} failed: {error}")
            }
            Self::DecryptionFailed { record_type, field, record_id } => {
                write!(f, "decrypting {record_type}.{field} of record {record_id} failed")
            }
        }
    }
}

/// Receives engine events.
pub trait EventSink: Send + Sync {
    /// Handles one event. Must not block for long.
    fn emit(&self, event: &EngineEvent);
}

/// Default sink: writes every event to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::IndexingFailed { record_id, index, error } => {
                tracing::warn!(record_id = %record_id, index = %index, error = %error, "search indexing failed");
            }
            EngineEvent::DecryptionFailed { record_type, field, record_id } => {
                tracing::error!(
                    record_type = %record_type,
                    field = %field,
                    record_id = %record_id,
                    "stored value could not be decrypted"
                );
            }
        }
    }
}

/// Sink collecting events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }
}
