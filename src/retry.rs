//! Optimistic-concurrency retry
//!
//! Commands load an aggregate, decide, and append at the loaded version. When
//! another writer got there first the append fails with a conflict and the
//! whole load-decide-append cycle runs again against fresh state.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use uuid::Uuid;

use crate::config::LedgerSettings;
use crate::domain::DomainError;
use crate::error::{AppError, AppResult};

/// Run `attempt` until it succeeds, fails with a non-conflict error, or the
/// retry budget is spent, in which case `PersistenceConflict` is returned.
pub async fn retry_on_conflict<T, F, Fut>(
    settings: &LedgerSettings,
    aggregate_id: Uuid,
    mut attempt: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_retries = settings.conflict_max_retries;

    for n in 0..=max_retries {
        match attempt().await {
            Err(e) if e.is_conflict() && n < max_retries => {
                tracing::warn!(
                    aggregate_id = %aggregate_id,
                    "Concurrency conflict, retrying (attempt {}/{})",
                    n + 1,
                    max_retries
                );
                tokio::time::sleep(backoff(settings.conflict_backoff, n)).await;
            }
            Err(e) if e.is_conflict() => break,
            other => return other,
        }
    }

    tracing::warn!(aggregate_id = %aggregate_id, "Concurrency retries exhausted");
    Err(AppError::Domain(DomainError::PersistenceConflict { aggregate_id }))
}

/// Linear backoff plus up to one step of jitter, so racing writers spread out
fn backoff(step: Duration, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=step.as_micros() as u64);
    step * (attempt + 1) + Duration::from_micros(jitter)
}
