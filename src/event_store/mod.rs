//! Event Store module
//!
//! Persistence layer for Event Sourcing. Events are appended per aggregate
//! with an expected version; a batch spanning several aggregates commits
//! atomically or not at all. Two implementations: an in-memory store used by
//! default and in tests, and a PostgreSQL store.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{DomainEvent, OperationContext};
use crate::idempotency::{IdempotencyClaim, IdempotencyRecord};

pub use error::EventStoreError;
pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

/// Stored event
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: Uuid,
    /// Global append order
    pub sequence: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub context: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Serialized event awaiting append
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: String,
    pub event_data: serde_json::Value,
}

/// Events to append to one aggregate
#[derive(Debug, Clone)]
pub struct AggregateOperation {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Version the aggregate must be at; 0 for a new aggregate
    pub expected_version: i64,
    pub events: Vec<PendingEvent>,
}

impl AggregateOperation {
    /// Create a new aggregate operation
    pub fn new<E: DomainEvent>(
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[E],
    ) -> Result<Self, EventStoreError> {
        let events = events
            .iter()
            .map(|event| -> Result<PendingEvent, EventStoreError> {
                Ok(PendingEvent {
                    event_type: event.event_type().to_string(),
                    event_data: serde_json::to_value(event)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            expected_version,
            events,
        })
    }

    /// Operation appending `events` to `aggregate` at its current version
    pub fn for_aggregate<A>(aggregate: &A, events: &[A::Event]) -> Result<Self, EventStoreError>
    where
        A: Aggregate,
        A::Event: DomainEvent,
    {
        Self::new(A::aggregate_type(), aggregate.id(), aggregate.version(), events)
    }

    /// Operation creating a new aggregate
    pub fn create<A>(aggregate_id: Uuid, events: &[A::Event]) -> Result<Self, EventStoreError>
    where
        A: Aggregate,
        A::Event: DomainEvent,
    {
        Self::new(A::aggregate_type(), aggregate_id, 0, events)
    }
}

/// Atomic unit of work
#[derive(Debug, Clone, Default)]
pub struct AppendBatch {
    pub operations: Vec<AggregateOperation>,
    pub idempotency: Option<IdempotencyClaim>,
}

impl AppendBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, operation: AggregateOperation) -> Self {
        self.push(operation);
        self
    }

    pub fn push(&mut self, operation: AggregateOperation) {
        if !operation.events.is_empty() {
            self.operations.push(operation);
        }
    }

    pub fn with_claim(mut self, claim: IdempotencyClaim) -> Self {
        self.idempotency = Some(claim);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.operations.iter().map(|op| op.events.len()).sum()
    }
}

/// Event persistence
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append every operation of the batch or none of them. Fails with
    /// `ConcurrencyConflict` if any aggregate is not at its expected version
    /// and with `IdempotencyKeyClaimed` if the claim's key is bound elsewhere.
    /// Returns the ids of the appended events.
    async fn append(
        &self,
        batch: AppendBatch,
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError>;

    /// Events of one aggregate in version order
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events of every aggregate of a type in append order
    async fn load_events_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Ids of every aggregate of a type in creation order
    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<Uuid>, EventStoreError>;

    async fn lookup_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, EventStoreError>;
}

/// Load an aggregate by replaying its events
///
/// Returns `None` when no events exist for the id or they belong to another
/// aggregate type.
pub async fn load_aggregate<A>(
    store: &dyn EventStore,
    aggregate_id: Uuid,
) -> Result<Option<A>, EventStoreError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let events = store.load_events(aggregate_id).await?;
    match events.first() {
        None => return Ok(None),
        Some(first) if first.aggregate_type != A::aggregate_type() => return Ok(None),
        Some(_) => {}
    }
    replay(events).map(Some)
}

/// Load every aggregate of a type
pub async fn load_all<A>(store: &dyn EventStore) -> Result<Vec<A>, EventStoreError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let events = store.load_events_by_type(A::aggregate_type()).await?;
    let mut order: Vec<Uuid> = Vec::new();
    let mut grouped: std::collections::HashMap<Uuid, Vec<StoredEvent>> =
        std::collections::HashMap::new();
    for event in events {
        if !grouped.contains_key(&event.aggregate_id) {
            order.push(event.aggregate_id);
        }
        grouped.entry(event.aggregate_id).or_default().push(event);
    }

    order
        .into_iter()
        .filter_map(|id| grouped.remove(&id))
        .map(replay::<A>)
        .collect()
}

fn replay<A>(mut events: Vec<StoredEvent>) -> Result<A, EventStoreError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    events.sort_by_key(|e| e.version);
    let mut aggregate = A::default();
    for stored_event in events {
        let event: A::Event = serde_json::from_value(stored_event.event_data).map_err(|e| {
            EventStoreError::CorruptEvent {
                aggregate_id: stored_event.aggregate_id,
                version: stored_event.version,
                event_type: stored_event.event_type.clone(),
                reason: e.to_string(),
            }
        })?;
        aggregate = aggregate.apply(event);
    }
    Ok(aggregate)
}
