//! In-memory event store
//!
//! The whole store sits behind one `RwLock`; an append validates every
//! operation and the idempotency claim under the write lock before touching
//! state, which makes a batch atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::idempotency::IdempotencyRecord;

use super::{AppendBatch, EventStore, EventStoreError, StoredEvent};

#[derive(Debug, Default)]
struct Inner {
    events: Vec<StoredEvent>,
    /// Indexes into `events` per aggregate, in version order
    by_aggregate: HashMap<Uuid, Vec<usize>>,
    idempotency_keys: HashMap<String, IdempotencyRecord>,
}

impl Inner {
    fn current_version(&self, aggregate_id: Uuid) -> i64 {
        self.by_aggregate
            .get(&aggregate_id)
            .and_then(|idx| idx.last())
            .map(|&i| self.events[i].version)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        batch: AppendBatch,
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let context_json = serde_json::to_value(context)?;
        let mut inner = self.inner.write().await;

        // Validate everything before mutating
        let mut versions: HashMap<Uuid, i64> = HashMap::new();
        for op in &batch.operations {
            let current = versions
                .get(&op.aggregate_id)
                .copied()
                .unwrap_or_else(|| inner.current_version(op.aggregate_id));
            if current != op.expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: op.aggregate_id,
                    expected: op.expected_version,
                    actual: current,
                });
            }
            versions.insert(op.aggregate_id, current + op.events.len() as i64);
        }

        if let Some(claim) = &batch.idempotency {
            if let Some(existing) = inner.idempotency_keys.get(&claim.key) {
                if Some(existing.aggregate_id) != claim.replaces {
                    return Err(EventStoreError::IdempotencyKeyClaimed {
                        key: claim.key.clone(),
                        aggregate_id: existing.aggregate_id,
                    });
                }
            }
        }

        let now = Utc::now();
        let idempotency_key = batch.idempotency.as_ref().map(|c| c.key.clone());
        let mut event_ids = Vec::with_capacity(batch.event_count());

        for op in batch.operations {
            let mut version = op.expected_version;
            for pending in op.events {
                version += 1;
                let id = Uuid::new_v4();
                let index = inner.events.len();
                let stored = StoredEvent {
                    id,
                    sequence: index as i64 + 1,
                    aggregate_type: op.aggregate_type.clone(),
                    aggregate_id: op.aggregate_id,
                    version,
                    event_type: pending.event_type,
                    event_data: pending.event_data,
                    context: context_json.clone(),
                    idempotency_key: if event_ids.is_empty() {
                        idempotency_key.clone()
                    } else {
                        None
                    },
                    created_at: now,
                };
                inner.events.push(stored);
                inner
                    .by_aggregate
                    .entry(op.aggregate_id)
                    .or_default()
                    .push(index);
                event_ids.push(id);
            }
        }

        if let Some(claim) = batch.idempotency {
            let created_at = inner
                .idempotency_keys
                .get(&claim.key)
                .map(|r| r.created_at)
                .unwrap_or(now);
            inner.idempotency_keys.insert(
                claim.key.clone(),
                IdempotencyRecord {
                    key: claim.key,
                    request_hash: claim.request_hash,
                    aggregate_id: claim.aggregate_id,
                    created_at,
                    updated_at: now,
                },
            );
        }

        Ok(event_ids)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_aggregate
            .get(&aggregate_id)
            .map(|idx| idx.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn load_events_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type)
            .cloned()
            .collect())
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<Uuid>, EventStoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.version == 1)
            .map(|e| e.aggregate_id)
            .collect())
    }

    async fn lookup_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, EventStoreError> {
        Ok(self.inner.read().await.idempotency_keys.get(key).cloned())
    }
}
