//! Balance Engine
//!
//! A party's balance is the net amount of completed transactions paid to it
//! minus those paid by it. The engine caches the fold per party and updates
//! it incrementally as transactions change status; `recompute` replays the
//! ledger from scratch and must always agree with the cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Transaction};
use crate::domain::{Currency, Money, TransactionStatus};
use crate::event_store::{load_all, EventStore, EventStoreError};

#[derive(Debug, Default)]
struct BalanceCache {
    warmed: bool,
    /// Balance per party in minor units
    balances: HashMap<Uuid, i64>,
    /// Per transaction: last applied version and whether it currently counts
    applied: HashMap<Uuid, (i64, bool)>,
}

impl BalanceCache {
    fn apply(&mut self, tx: &Transaction) {
        let counts = tx.status() == TransactionStatus::Completed;
        let (last_version, counted) = self.applied.get(&tx.id()).copied().unwrap_or((0, false));
        if tx.version() <= last_version {
            return;
        }
        self.applied.insert(tx.id(), (tx.version(), counts));
        if counts == counted {
            return;
        }

        let net = tx.net_amount().minor();
        let sign = if counts { 1 } else { -1 };
        *self.balances.entry(tx.to_party()).or_default() += sign * net;
        *self.balances.entry(tx.from_party()).or_default() -= sign * net;
    }
}

/// Balance Engine
pub struct BalanceEngine {
    store: Arc<dyn EventStore>,
    currency: Currency,
    cache: RwLock<BalanceCache>,
}

impl BalanceEngine {
    pub fn new(store: Arc<dyn EventStore>, currency: Currency) -> Self {
        Self {
            store,
            currency,
            cache: RwLock::new(BalanceCache::default()),
        }
    }

    /// Current balance of a party from the cache
    pub async fn balance(&self, party: Uuid) -> Result<Money, EventStoreError> {
        self.ensure_warm().await?;
        let cache = self.cache.read().await;
        let minor = cache.balances.get(&party).copied().unwrap_or(0);
        Ok(Money::from_minor(minor, self.currency))
    }

    /// Full replay of the ledger for one party, bypassing the cache
    pub async fn recompute(&self, party: Uuid) -> Result<Money, EventStoreError> {
        let transactions = load_all::<Transaction>(self.store.as_ref()).await?;
        let minor: i64 = transactions
            .iter()
            .filter(|tx| tx.net_amount().currency() == self.currency)
            .map(|tx| tx.balance_delta(party).minor())
            .sum();
        Ok(Money::from_minor(minor, self.currency))
    }

    /// Incremental update after a transaction changed status. Applying the
    /// same or an older state of a transaction twice has no effect.
    pub async fn apply_delta(&self, tx: &Transaction) {
        if tx.net_amount().currency() != self.currency {
            tracing::warn!(
                transaction_id = %tx.id(),
                currency = %tx.net_amount().currency(),
                "Transaction outside ledger currency ignored by balance cache"
            );
            return;
        }

        let mut cache = self.cache.write().await;
        if !cache.warmed {
            // The next read rebuilds from the store, which already holds this state
            return;
        }
        cache.apply(tx);

        tracing::debug!(
            transaction_id = %tx.id(),
            status = %tx.status(),
            from = %tx.from_party(),
            to = %tx.to_party(),
            "Balance cache updated"
        );
    }

    /// Drop the cache and rebuild it from the event stream
    pub async fn rebuild(&self) -> Result<(), EventStoreError> {
        let mut cache = self.cache.write().await;
        self.rebuild_locked(&mut cache).await
    }

    async fn ensure_warm(&self) -> Result<(), EventStoreError> {
        if self.cache.read().await.warmed {
            return Ok(());
        }
        let mut cache = self.cache.write().await;
        if cache.warmed {
            return Ok(());
        }
        self.rebuild_locked(&mut cache).await
    }

    /// The write lock is held across the load so no delta is lost in between
    async fn rebuild_locked(&self, cache: &mut BalanceCache) -> Result<(), EventStoreError> {
        let transactions = load_all::<Transaction>(self.store.as_ref()).await?;

        let mut fresh = BalanceCache::default();
        for tx in transactions
            .iter()
            .filter(|tx| tx.net_amount().currency() == self.currency)
        {
            fresh.apply(tx);
        }
        fresh.warmed = true;

        tracing::info!(
            parties = fresh.balances.len(),
            transactions = fresh.applied.len(),
            "Balance cache rebuilt"
        );

        *cache = fresh;
        Ok(())
    }
}
