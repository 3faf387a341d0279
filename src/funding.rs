//! Funding Aggregator
//!
//! Accepts lender contributions against a loan's target amount. The
//! contribution, the loan's new funded amount, any resulting status change
//! and the settled `loan-funding` transaction are appended as one batch at
//! the loan's loaded version, so two concurrent contributions can never both
//! be accepted against the same remaining amount.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Loan, NewTransaction, Transaction};
use crate::config::LedgerSettings;
use crate::domain::{
    Clock, DomainError, LoanStatus, Money, OperationContext, PaymentMethod, TransactionType,
};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, AggregateOperation, AppendBatch, EventStore};
use crate::ledger::TransactionLedger;
use crate::retry::retry_on_conflict;

/// Result of an accepted contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingResult {
    pub loan_id: Uuid,
    pub lender_id: Uuid,
    pub accepted: Money,
    pub transaction_id: Uuid,
    pub new_funded_amount: Money,
    pub remaining_amount: Money,
    pub fully_funded: bool,
    pub status: LoanStatus,
}

/// Funding Aggregator
#[derive(Clone)]
pub struct FundingAggregator {
    store: Arc<dyn EventStore>,
    ledger: TransactionLedger,
    clock: Arc<dyn Clock>,
    settings: Arc<LedgerSettings>,
}

impl FundingAggregator {
    pub fn new(
        store: Arc<dyn EventStore>,
        ledger: TransactionLedger,
        clock: Arc<dyn Clock>,
        settings: Arc<LedgerSettings>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            settings,
        }
    }

    /// Accept a contribution or reject it with `NotFundable`,
    /// `DuplicateLender` or `OverfundingRejected`
    pub async fn contribute(
        &self,
        loan_id: Uuid,
        lender_id: Uuid,
        amount: Money,
        context: &OperationContext,
    ) -> AppResult<FundingResult> {
        let result = retry_on_conflict(&self.settings, loan_id, move || {
            self.try_contribute(loan_id, lender_id, amount, context)
        })
        .await?;

        tracing::info!(
            loan_id = %loan_id,
            lender_id = %lender_id,
            amount = %amount,
            funded = %result.new_funded_amount,
            fully_funded = result.fully_funded,
            "Contribution accepted"
        );

        Ok(result)
    }

    async fn try_contribute(
        &self,
        loan_id: Uuid,
        lender_id: Uuid,
        amount: Money,
        context: &OperationContext,
    ) -> AppResult<FundingResult> {
        let loan: Loan = load_aggregate(self.store.as_ref(), loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(loan_id))?;

        let now = self.clock.now();
        let transaction_id = Uuid::new_v4();
        let decision = loan.contribute(lender_id, amount, transaction_id, now)?;

        let funding = NewTransaction::new(
            lender_id,
            loan.borrower_id(),
            TransactionType::LoanFunding,
            amount,
            PaymentMethod::Internal,
        )
        .for_loan(loan_id, None)
        .with_description(format!("Funding for loan {}", loan_id));
        let (transaction, tx_events) =
            self.ledger
                .prepare_settled(transaction_id, funding, lender_id, now)?;

        let batch = AppendBatch::new()
            .with(AggregateOperation::for_aggregate(&loan, &decision.events)?)
            .with(AggregateOperation::create::<Transaction>(
                transaction_id,
                &tx_events,
            )?);
        self.ledger.commit(batch, &[transaction], context).await?;

        let loan = loan.apply_all(decision.events);
        Ok(FundingResult {
            loan_id,
            lender_id,
            accepted: amount,
            transaction_id,
            new_funded_amount: decision.new_funded_amount,
            remaining_amount: loan.remaining_amount()?,
            fully_funded: decision.fully_funded,
            status: loan.status(),
        })
    }
}
