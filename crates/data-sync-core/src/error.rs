// File: src/error.rs
//
// Error taxonomy for the data synchronization engine

use uuid::Uuid;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Classification that drives the retry decision for a failed operation.
///
/// Transient failures feed the event's own retry machinery; permanent
/// failures terminate the event immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Error types for synchronization operations
#[derive(Debug, thiserror::Error, Clone)]
pub enum SyncError {
    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Concurrency conflict: {message}")]
    ConcurrencyError { message: String },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: Uuid },

    #[error("Invalid status transition for event {event_id}: {from} -> {to}")]
    InvalidTransition {
        event_id: Uuid,
        from: String,
        to: String,
    },

    #[error("No sync configuration registered for entity type {entity_type}")]
    ConfigurationMissing { entity_type: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Adapter {adapter} failed: {message}")]
    AdapterFailure {
        adapter: String,
        message: String,
        class: ErrorClass,
    },

    #[error("Conflict for {entity_type}/{entity_id} unresolved: {reason}")]
    ConflictUnresolved {
        entity_type: String,
        entity_id: String,
        reason: String,
    },

    #[error("Schema validation failed for {entity_type}: {message}")]
    SchemaValidation { entity_type: String, message: String },

    #[error("Replication transport error for {target_region}: {message}")]
    ReplicationError {
        target_region: String,
        message: String,
    },

    #[error("Replication cursor not found for ({entity_type}, {source_region} -> {target_region})")]
    CursorNotFound {
        entity_type: String,
        source_region: String,
        target_region: String,
    },

    #[error("Deadline of {deadline_ms} ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("Engine saturated: {pending} pending events exceed the high-watermark {high_watermark}")]
    Saturated { pending: usize, high_watermark: usize },

    #[error("Cache invalidation error: {message}")]
    CacheError { message: String },

    #[error("Integrity check error: {message}")]
    IntegrityError { message: String },
}

impl SyncError {
    /// Classify the error for the retry decision.
    ///
    /// Deadline overruns count as transient for the attempt; configuration,
    /// schema, and unresolved-conflict failures are terminal.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::DatabaseError { .. }
            | SyncError::ConcurrencyError { .. }
            | SyncError::DeadlineExceeded { .. }
            | SyncError::ReplicationError { .. }
            | SyncError::CacheError { .. } => ErrorClass::Transient,
            SyncError::AdapterFailure { class, .. } => *class,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::SerializationError {
            message: error.to_string(),
        }
    }
}
