//! PostgreSQL event store
//!
//! Optimistic concurrency is enforced twice: the current version is checked
//! inside the transaction, and the `(aggregate_id, version)` unique index
//! rejects a concurrent writer that passed the same check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::idempotency::{IdempotencyClaim, IdempotencyRecord};

use super::{AppendBatch, EventStore, EventStoreError, StoredEvent};

const UNIQUE_VIOLATION: &str = "23505";

const EVENT_COLUMNS: &str = "id, sequence, aggregate_type, aggregate_id, version, event_type, \
     event_data, context, idempotency_key, created_at";

/// Event Store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a new PgEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get current version of an aggregate
    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(0))
    }

    /// Bind the key to the claim's aggregate, or fail if it is bound elsewhere
    async fn claim_key(
        tx: &mut Transaction<'_, Postgres>,
        claim: &IdempotencyClaim,
    ) -> Result<(), EventStoreError> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT aggregate_id FROM idempotency_keys WHERE key = $1 FOR UPDATE
            "#,
        )
        .bind(&claim.key)
        .fetch_optional(&mut **tx)
        .await?;

        match existing {
            Some(bound) if Some(bound) == claim.replaces => {
                sqlx::query(
                    r#"
                    UPDATE idempotency_keys
                    SET aggregate_id = $2, request_hash = $3, updated_at = NOW()
                    WHERE key = $1
                    "#,
                )
                .bind(&claim.key)
                .bind(claim.aggregate_id)
                .bind(&claim.request_hash)
                .execute(&mut **tx)
                .await?;
                Ok(())
            }
            Some(bound) => Err(EventStoreError::IdempotencyKeyClaimed {
                key: claim.key.clone(),
                aggregate_id: bound,
            }),
            None => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO idempotency_keys (key, request_hash, aggregate_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (key) DO NOTHING
                    "#,
                )
                .bind(&claim.key)
                .bind(&claim.request_hash)
                .bind(claim.aggregate_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                if inserted == 0 {
                    // Lost the race to a concurrent claim; the caller reloads
                    return Err(EventStoreError::IdempotencyKeyClaimed {
                        key: claim.key.clone(),
                        aggregate_id: Uuid::nil(),
                    });
                }
                Ok(())
            }
        }
    }

    async fn try_append(
        &self,
        batch: &AppendBatch,
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let context_json = serde_json::to_value(context)?;
        let mut tx = self.pool.begin().await?;

        if let Some(claim) = &batch.idempotency {
            Self::claim_key(&mut tx, claim).await?;
        }

        let idempotency_key = batch.idempotency.as_ref().map(|c| c.key.as_str());
        let mut event_ids = Vec::with_capacity(batch.event_count());

        for op in &batch.operations {
            let current_version = Self::current_version(&mut tx, op.aggregate_id).await?;
            if current_version != op.expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: op.aggregate_id,
                    expected: op.expected_version,
                    actual: current_version,
                });
            }

            let mut version = op.expected_version;
            for pending in &op.events {
                version += 1;
                let event_id = Uuid::new_v4();
                let key = if event_ids.is_empty() {
                    idempotency_key
                } else {
                    None
                };

                sqlx::query(
                    r#"
                    INSERT INTO events (
                        id, aggregate_type, aggregate_id, version,
                        event_type, event_data, context, idempotency_key
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(event_id)
                .bind(&op.aggregate_type)
                .bind(op.aggregate_id)
                .bind(version)
                .bind(&pending.event_type)
                .bind(&pending.event_data)
                .bind(&context_json)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_unique_violation(e, op.aggregate_id, op.expected_version))?;

                event_ids.push(event_id);
            }
        }

        tx.commit().await?;
        Ok(event_ids)
    }
}

fn map_unique_violation(error: sqlx::Error, aggregate_id: Uuid, expected: i64) -> EventStoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: expected + 1,
            };
        }
    }
    EventStoreError::Database(error)
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    Ok(StoredEvent {
        id: row.try_get("id")?,
        sequence: row.try_get("sequence")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        version: row.try_get("version")?,
        event_type: row.try_get("event_type")?,
        event_data: row.try_get("event_data")?,
        context: row.try_get("context")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(
        &self,
        batch: AppendBatch,
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let event_ids = self.try_append(&batch, context).await?;

        tracing::debug!(
            operations = batch.operations.len(),
            events = event_ids.len(),
            "Events appended"
        );

        Ok(event_ids)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE aggregate_id = $1 ORDER BY version ASC",
            EVENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_event)
            .collect()
    }

    async fn load_events_by_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE aggregate_type = $1 ORDER BY sequence ASC",
            EVENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(aggregate_type)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_event)
            .collect()
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<Uuid>, EventStoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT aggregate_id FROM events
            WHERE aggregate_type = $1 AND version = 1
            ORDER BY sequence ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn lookup_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, EventStoreError> {
        let result: Option<(String, String, Uuid, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT key, request_hash, aggregate_id, created_at, updated_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(
            |(key, request_hash, aggregate_id, created_at, updated_at)| IdempotencyRecord {
                key,
                request_hash,
                aggregate_id,
                created_at,
                updated_at,
            },
        ))
    }
}
