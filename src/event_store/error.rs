//! Event Store Errors

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer appended to the aggregate first
    #[error("Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// The key already points at a different aggregate
    #[error("Idempotency key '{key}' is already bound to {aggregate_id}")]
    IdempotencyKeyClaimed { key: String, aggregate_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored event no longer matches its type
    #[error("Cannot replay {event_type} at {aggregate_id} v{version}: {reason}")]
    CorruptEvent {
        aggregate_id: Uuid,
        version: i64,
        event_type: String,
        reason: String,
    },
}

impl EventStoreError {
    /// Lost an append race; the caller may reload and try again
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. }
                | EventStoreError::IdempotencyKeyClaimed { .. }
        )
    }
}
