//! Idempotency-key resolution shared by the transaction-creating handlers

use uuid::Uuid;

use crate::aggregate::{Aggregate, Transaction};
use crate::domain::{DomainError, TransactionStatus};
use crate::error::AppResult;
use crate::idempotency::{IdempotencyClaim, IdempotencyKey};
use crate::state::AppState;

/// What an idempotency key says about the request at hand
pub(super) enum KeyState {
    /// First use, or the earlier transaction failed and may be replaced
    Fresh { replaces: Option<Uuid> },
    /// An earlier identical request created this live transaction
    Replay(Transaction),
}

pub(super) async fn resolve(
    state: &AppState,
    owner: Uuid,
    key: Option<&IdempotencyKey>,
    request_hash: &str,
) -> AppResult<KeyState> {
    let Some(key) = key else {
        return Ok(KeyState::Fresh { replaces: None });
    };
    let stored = key.storage_key(owner);
    let Some(record) = state.store.lookup_idempotency_key(&stored).await? else {
        return Ok(KeyState::Fresh { replaces: None });
    };

    if record.request_hash != request_hash {
        return Err(DomainError::IdempotencyConflict {
            key: key.to_string(),
        }
        .into());
    }

    match state.ledger().find(record.aggregate_id).await? {
        Some(tx) if tx.status() != TransactionStatus::Failed => {
            tracing::info!(
                idempotency_key = %key,
                transaction_id = %tx.id(),
                "Idempotent replay"
            );
            Ok(KeyState::Replay(tx))
        }
        _ => Ok(KeyState::Fresh {
            replaces: Some(record.aggregate_id),
        }),
    }
}

pub(super) fn claim(
    owner: Uuid,
    key: Option<&IdempotencyKey>,
    request_hash: &str,
    transaction_id: Uuid,
    replaces: Option<Uuid>,
) -> Option<IdempotencyClaim> {
    key.map(|key| {
        let claim = IdempotencyClaim::new(key, owner, request_hash.to_string(), transaction_id);
        match replaces {
            Some(previous) => claim.replacing(previous),
            None => claim,
        }
    })
}
