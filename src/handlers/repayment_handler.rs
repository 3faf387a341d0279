//! Repayment Handler
//!
//! Records a `loan-repayment` transaction from the borrower to the loan's
//! escrow party and links it to the installment it pays. The installment is
//! only marked paid once the transaction completes.

use uuid::Uuid;

use crate::aggregate::{Aggregate, Loan, NewTransaction, Transaction};
use crate::domain::{DomainError, Money, OperationContext, Principal, TransactionType};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, AggregateOperation, AppendBatch, EventStoreError};
use crate::idempotency::{compute_request_hash, IdempotencyKey};
use crate::retry::retry_on_conflict;
use crate::state::AppState;

use super::idempotent::{self, KeyState};
use super::views::{RepaymentResult, TransactionView};
use super::RecordRepaymentCommand;

/// Handler for installment repayments
pub struct RecordRepaymentHandler {
    state: AppState,
}

impl RecordRepaymentHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Execute the repayment command
    ///
    /// A retry under the same idempotency key returns the transaction the
    /// first request created unless that transaction failed.
    pub async fn execute(
        &self,
        command: RecordRepaymentCommand,
        idempotency_key: Option<IdempotencyKey>,
        context: &OperationContext,
    ) -> AppResult<RepaymentResult> {
        let principal = context.principal()?;
        let amount = Money::parse(&command.amount, self.state.settings.currency)?;

        let request_hash = compute_request_hash(&(
            principal.user_id,
            command.loan_id,
            command.installment_number,
            amount,
            command.payment_method,
        ))
        .map_err(EventStoreError::from)?;

        let command = &command;
        let key = idempotency_key.as_ref();
        let request_hash = request_hash.as_str();
        let result = retry_on_conflict(&self.state.settings, command.loan_id, move || {
            self.try_execute(command, amount, principal, key, request_hash, context)
        })
        .await?;

        if !result.replayed {
            tracing::info!(
                loan_id = %command.loan_id,
                installment = command.installment_number,
                transaction_id = %result.transaction.id,
                amount = %amount,
                "Repayment recorded"
            );
        }

        Ok(result)
    }

    async fn try_execute(
        &self,
        command: &RecordRepaymentCommand,
        amount: Money,
        principal: Principal,
        key: Option<&IdempotencyKey>,
        request_hash: &str,
        context: &OperationContext,
    ) -> AppResult<RepaymentResult> {
        // Loaded before the key lookup: a concurrent retry that commits in
        // between then surfaces as a version conflict and replays
        let loan: Loan = load_aggregate(self.state.store.as_ref(), command.loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(command.loan_id))?;

        let owner = principal.user_id;
        let replaces = match idempotent::resolve(&self.state, owner, key, request_hash).await? {
            KeyState::Replay(tx) => {
                return Ok(RepaymentResult {
                    transaction: TransactionView::from(&tx),
                    replayed: true,
                })
            }
            KeyState::Fresh { replaces } => replaces,
        };

        let ledger = self.state.ledger();
        let now = ledger.now();
        let transaction_id = Uuid::new_v4();
        let linked = loan.link_repayment(
            principal.user_id,
            command.installment_number,
            amount,
            transaction_id,
            now,
        )?;

        let fee = ledger.processing_fee(amount, command.payment_method)?;
        let repayment = NewTransaction::new(
            principal.user_id,
            loan.id(),
            TransactionType::LoanRepayment,
            amount,
            command.payment_method,
        )
        .with_fee(fee)
        .for_loan(loan.id(), Some(command.installment_number))
        .with_description(format!(
            "Repayment of installment {}",
            command.installment_number
        ))
        .with_idempotency_key(key.map(|k| k.as_str().to_string()));
        let (transaction, created) =
            ledger.prepare(transaction_id, repayment, principal.user_id, now)?;

        let mut batch = AppendBatch::new()
            .with(AggregateOperation::for_aggregate(&loan, &[linked])?)
            .with(AggregateOperation::create::<Transaction>(
                transaction_id,
                &[created],
            )?);
        if let Some(claim) = idempotent::claim(owner, key, request_hash, transaction_id, replaces) {
            batch = batch.with_claim(claim);
        }
        ledger.commit(batch, &[], context).await?;

        Ok(RepaymentResult {
            transaction: TransactionView::from(&transaction),
            replayed: false,
        })
    }
}
