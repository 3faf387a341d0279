//! Transaction Ledger
//!
//! Append-only store of monetary transactions. Transactions are created
//! `pending` and move only along the legal status edges; every change appends
//! one audit entry. Transitions on one transaction are serialized by the
//! optimistic version check. Balances are updated as part of every commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Aggregate, NewTransaction, Transaction};
use crate::config::LedgerSettings;
use crate::domain::{
    Clock, DomainError, Money, OperationContext, PaymentMethod, TransactionEvent,
    TransactionStatus, TransactionType,
};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, load_all, AggregateOperation, AppendBatch, EventStore};
use crate::idempotency::IdempotencyClaim;
use crate::projection::BalanceEngine;
use crate::retry::retry_on_conflict;

/// Filter for transaction listings
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Only transactions where this party is source or destination
    pub party: Option<Uuid>,
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub loan_id: Option<Uuid>,
}

impl TransactionFilter {
    fn matches(&self, tx: &Transaction) -> bool {
        self.party.map_or(true, |p| tx.involves(p))
            && self.transaction_type.map_or(true, |t| tx.transaction_type() == t)
            && self.status.map_or(true, |s| tx.status() == s)
            && self.loan_id.map_or(true, |l| tx.loan_id() == Some(l))
    }
}

/// Totals of one transaction type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeTotals {
    pub count: u64,
    pub total: Money,
}

/// Completed-transaction statistics of a party
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub party: Uuid,
    pub completed_count: u64,
    pub total_received: Money,
    pub total_sent: Money,
    pub by_type: BTreeMap<String, TypeTotals>,
}

/// Transaction Ledger service
#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn EventStore>,
    balances: Arc<BalanceEngine>,
    clock: Arc<dyn Clock>,
    settings: Arc<LedgerSettings>,
}

impl TransactionLedger {
    pub fn new(
        store: Arc<dyn EventStore>,
        balances: Arc<BalanceEngine>,
        clock: Arc<dyn Clock>,
        settings: Arc<LedgerSettings>,
    ) -> Self {
        Self {
            store,
            balances,
            clock,
            settings,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        Ok(load_aggregate::<Transaction>(self.store.as_ref(), id).await?)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Transaction> {
        self.find(id)
            .await?
            .ok_or_else(|| DomainError::TransactionNotFound(id).into())
    }

    /// Newest first
    pub async fn list(&self, filter: &TransactionFilter) -> AppResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = load_all::<Transaction>(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|tx| filter.matches(tx))
            .collect();
        transactions.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(transactions)
    }

    pub async fn stats(&self, party: Uuid) -> AppResult<TransactionStats> {
        let currency = self.settings.currency;
        let completed = self
            .list(&TransactionFilter {
                party: Some(party),
                status: Some(TransactionStatus::Completed),
                ..TransactionFilter::default()
            })
            .await?;

        let mut stats = TransactionStats {
            party,
            completed_count: 0,
            total_received: Money::zero(currency),
            total_sent: Money::zero(currency),
            by_type: BTreeMap::new(),
        };

        for tx in completed.iter().filter(|tx| tx.amount().currency() == currency) {
            stats.completed_count += 1;
            if tx.to_party() == party {
                stats.total_received = stats.total_received.checked_add(tx.net_amount())?;
            }
            if tx.from_party() == party {
                stats.total_sent = stats.total_sent.checked_add(tx.net_amount())?;
            }
            let totals = stats
                .by_type
                .entry(tx.transaction_type().as_str().to_string())
                .or_insert_with(|| TypeTotals {
                    count: 0,
                    total: Money::zero(currency),
                });
            totals.count += 1;
            totals.total = totals.total.checked_add(tx.amount())?;
        }

        Ok(stats)
    }

    // =========================================================================
    // Decisions (no persistence)
    // =========================================================================

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fee charged on a transaction settled through the payment gateway
    pub fn processing_fee(&self, amount: Money, method: PaymentMethod) -> Result<Money, DomainError> {
        if method == PaymentMethod::Internal || self.settings.processing_fee_bps == 0 {
            return Ok(Money::zero(amount.currency()));
        }
        Ok(amount.apply_bps(self.settings.processing_fee_bps)?)
    }

    /// Decide a new pending transaction
    pub fn prepare(
        &self,
        id: Uuid,
        new: NewTransaction,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, TransactionEvent), DomainError> {
        if new.amount.currency() != self.settings.currency {
            return Err(DomainError::InvalidAmount(format!(
                "ledger currency is {}",
                self.settings.currency
            )));
        }
        Transaction::create(id, new, actor, now)
    }

    /// Decide a transaction settled internally: created, processed and
    /// completed in one unit
    pub fn prepare_settled(
        &self,
        id: Uuid,
        new: NewTransaction,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, Vec<TransactionEvent>), DomainError> {
        let (mut tx, created) = self.prepare(id, new, actor, now)?;
        let mut events = vec![created];
        for status in [TransactionStatus::Processing, TransactionStatus::Completed] {
            let event = tx.transition(
                status,
                actor,
                Some("Settled internally".to_string()),
                None,
                now,
            )?;
            tx = tx.apply(event.clone());
            events.push(event);
        }
        Ok((tx, events))
    }

    // =========================================================================
    // Commits
    // =========================================================================

    /// Persist a batch and bring balances up to date with `touched`
    pub async fn commit(
        &self,
        batch: AppendBatch,
        touched: &[Transaction],
        context: &OperationContext,
    ) -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.append(batch, context).await?;
        for tx in touched {
            self.balances.apply_delta(tx).await;
        }
        Ok(())
    }

    /// Append a new pending transaction, optionally claiming an idempotency key
    pub async fn append(
        &self,
        id: Uuid,
        new: NewTransaction,
        actor: Uuid,
        claim: Option<IdempotencyClaim>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let (tx, created) = self.prepare(id, new, actor, self.clock.now())?;

        let mut batch =
            AppendBatch::new().with(AggregateOperation::create::<Transaction>(id, &[created])?);
        batch.idempotency = claim;
        self.commit(batch, &[], context).await?;

        tracing::info!(
            transaction_id = %tx.id(),
            reference = %tx.reference(),
            transaction_type = %tx.transaction_type(),
            amount = %tx.amount(),
            "Transaction created"
        );

        Ok(tx)
    }

    /// Move a transaction to `to`, retrying on concurrent modification
    pub async fn transition(
        &self,
        id: Uuid,
        to: TransactionStatus,
        actor: Uuid,
        details: Option<String>,
        gateway_ref: Option<String>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let details = details.as_deref();
        let gateway_ref = gateway_ref.as_deref();

        let tx = retry_on_conflict(&self.settings, id, move || {
            self.try_transition(id, to, actor, details, gateway_ref, context)
        })
        .await?;

        tracing::info!(
            transaction_id = %id,
            status = %tx.status(),
            "Transaction status changed"
        );

        Ok(tx)
    }

    /// Single load-decide-append attempt
    async fn try_transition(
        &self,
        id: Uuid,
        to: TransactionStatus,
        actor: Uuid,
        details: Option<&str>,
        gateway_ref: Option<&str>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let tx = self.get(id).await?;
        let event = tx.transition(
            to,
            actor,
            details.map(str::to_string),
            gateway_ref.map(str::to_string),
            self.clock.now(),
        )?;
        let batch =
            AppendBatch::new().with(AggregateOperation::for_aggregate(&tx, &[event.clone()])?);
        let tx = tx.apply(event);
        self.commit(batch, std::slice::from_ref(&tx), context).await?;
        Ok(tx)
    }
}
