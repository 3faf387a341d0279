//! Transaction Handlers
//!
//! Creation of stand-alone transactions and every status change a caller can
//! drive: gateway settlement, completion, cancellation and refund. Status
//! changes of a repayment carry their loan side effects in the same batch:
//! completion pays the installment and distributes the net amount to the
//! lenders, cancellation or failure frees the installment again.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::loan::SYSTEM_ACTOR;
use crate::aggregate::{Aggregate, Loan, NewTransaction, Transaction};
use crate::config::AllocationRule;
use crate::domain::{
    DomainError, Money, OperationContext, PaymentMethod, Principal, TransactionEvent,
    TransactionStatus, TransactionType,
};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, AggregateOperation, AppendBatch, EventStoreError};
use crate::gateway::{charge_with_timeout, GatewayError};
use crate::idempotency::{compute_request_hash, IdempotencyKey};
use crate::retry::retry_on_conflict;
use crate::state::AppState;

use super::idempotent::{self, KeyState};
use super::views::TransactionView;
use super::{CompleteTransactionCommand, CreateTransactionCommand, TransactionReasonCommand};

const REASON_LEN: (usize, usize) = (5, 500);

// =========================================================================
// CreateTransactionHandler
// =========================================================================

/// Handler for deposits, withdrawals, transfers and other non-loan movements
pub struct CreateTransactionHandler {
    state: AppState,
}

impl CreateTransactionHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Record a pending transaction from the caller to `to_party`
    pub async fn execute(
        &self,
        command: CreateTransactionCommand,
        idempotency_key: Option<IdempotencyKey>,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        if command.transaction_type.is_loan_flow() {
            return Err(DomainError::validation(
                "transaction_type",
                "loan transactions are recorded through the loan operations",
            )
            .into());
        }
        let amount = Money::parse(&command.amount, self.state.settings.currency)?;

        let request_hash = compute_request_hash(&(principal.user_id, &command))
            .map_err(EventStoreError::from)?;

        let transaction_id = Uuid::new_v4();
        let command = &command;
        let key = idempotency_key.as_ref();
        let request_hash = request_hash.as_str();
        retry_on_conflict(&self.state.settings, transaction_id, move || {
            self.try_execute(
                transaction_id,
                command,
                amount,
                principal,
                key,
                request_hash,
                context,
            )
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_execute(
        &self,
        transaction_id: Uuid,
        command: &CreateTransactionCommand,
        amount: Money,
        principal: Principal,
        key: Option<&IdempotencyKey>,
        request_hash: &str,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let owner = principal.user_id;
        let replaces = match idempotent::resolve(&self.state, owner, key, request_hash).await? {
            KeyState::Replay(tx) => return Ok(TransactionView::from(&tx)),
            KeyState::Fresh { replaces } => replaces,
        };

        let ledger = self.state.ledger();
        let fee = ledger.processing_fee(amount, command.payment_method)?;
        let mut new = NewTransaction::new(
            principal.user_id,
            command.to_party,
            command.transaction_type,
            amount,
            command.payment_method,
        )
        .with_fee(fee)
        .with_idempotency_key(key.map(|k| k.as_str().to_string()));
        if let Some(description) = &command.description {
            new = new.with_description(description.trim());
        }

        let claim = idempotent::claim(owner, key, request_hash, transaction_id, replaces);
        let tx = ledger
            .append(transaction_id, new, principal.user_id, claim, context)
            .await?;
        Ok(TransactionView::from(&tx))
    }
}

// =========================================================================
// TransactionStatusHandler
// =========================================================================

/// Handler for status changes of existing transactions
pub struct TransactionStatusHandler {
    state: AppState,
}

impl TransactionStatusHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Confirm payment: pending or processing → completed
    pub async fn complete(
        &self,
        command: CompleteTransactionCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        let gateway_ref = command
            .gateway_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        self.authorize(command.transaction_id, &principal).await?;
        let tx = self
            .finish_completed(command.transaction_id, principal.user_id, gateway_ref, context)
            .await?;
        Ok(TransactionView::from(&tx))
    }

    /// pending → cancelled, freeing a linked installment
    pub async fn cancel(
        &self,
        command: TransactionReasonCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        let reason = validate_reason(&command.reason)?;

        self.authorize(command.transaction_id, &principal).await?;
        let details = format!("Transaction cancelled: {}", reason);
        let tx = self
            .finish_closed(
                command.transaction_id,
                TransactionStatus::Cancelled,
                principal.user_id,
                &details,
                context,
            )
            .await?;
        Ok(TransactionView::from(&tx))
    }

    /// completed → refunded, administrative and outside the loan flows
    pub async fn refund(
        &self,
        command: TransactionReasonCommand,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        if !principal.is_admin() {
            return Err(DomainError::Unauthorized(
                "only administrators can refund transactions".to_string(),
            )
            .into());
        }
        let reason = validate_reason(&command.reason)?;

        let ledger = self.state.ledger();
        let tx = ledger.get(command.transaction_id).await?;
        if tx.transaction_type().is_loan_flow() || tx.loan_id().is_some() {
            return Err(DomainError::validation(
                "transaction_id",
                "loan transactions cannot be refunded",
            )
            .into());
        }

        let tx = ledger
            .transition(
                tx.id(),
                TransactionStatus::Refunded,
                principal.user_id,
                Some(format!("Refunded: {}", reason)),
                None,
                context,
            )
            .await?;
        Ok(TransactionView::from(&tx))
    }

    /// Drive a pending transaction through the payment gateway
    ///
    /// Approval completes it, a decline fails it. A call that does not
    /// answer in time fails it as well and surfaces `GatewayTimeout`.
    pub async fn settle(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        let tx = self.authorize(transaction_id, &principal).await?;
        if tx.payment_method() == PaymentMethod::Internal {
            return Err(DomainError::validation(
                "payment_method",
                "internal transactions are not settled through the gateway",
            )
            .into());
        }

        let tx = self
            .state
            .ledger()
            .transition(
                transaction_id,
                TransactionStatus::Processing,
                principal.user_id,
                Some("Submitted to payment gateway".to_string()),
                None,
                context,
            )
            .await?;

        let outcome = charge_with_timeout(
            self.state.gateway.as_ref(),
            tx.payment_method(),
            tx.amount(),
            tx.reference(),
            self.state.settings.gateway_timeout,
        )
        .await;

        match outcome {
            Ok(receipt) => {
                let tx = self
                    .finish_completed(
                        transaction_id,
                        principal.user_id,
                        Some(receipt.gateway_ref.as_str()),
                        context,
                    )
                    .await?;
                Ok(TransactionView::from(&tx))
            }
            Err(GatewayError::Declined(reason)) => {
                let details = format!("Payment declined: {}", reason);
                let tx = self
                    .finish_closed(
                        transaction_id,
                        TransactionStatus::Failed,
                        principal.user_id,
                        &details,
                        context,
                    )
                    .await?;
                Ok(TransactionView::from(&tx))
            }
            Err(err @ GatewayError::Timeout(_)) => {
                self.finish_closed(
                    transaction_id,
                    TransactionStatus::Failed,
                    principal.user_id,
                    &err.to_string(),
                    context,
                )
                .await?;
                Err(DomainError::GatewayTimeout { transaction_id }.into())
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Involved parties and admins may act on a transaction
    async fn authorize(&self, transaction_id: Uuid, principal: &Principal) -> AppResult<Transaction> {
        let tx = self.state.ledger().get(transaction_id).await?;
        if !principal.is_admin() && !tx.involves(principal.user_id) {
            return Err(DomainError::Unauthorized(
                "not a party to this transaction".to_string(),
            )
            .into());
        }
        Ok(tx)
    }

    async fn finish_completed(
        &self,
        transaction_id: Uuid,
        actor: Uuid,
        gateway_ref: Option<&str>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let tx = retry_on_conflict(&self.state.settings, transaction_id, move || {
            self.try_complete(transaction_id, actor, gateway_ref, context)
        })
        .await?;

        tracing::info!(
            transaction_id = %tx.id(),
            transaction_type = %tx.transaction_type(),
            net_amount = %tx.net_amount(),
            "Transaction completed"
        );
        Ok(tx)
    }

    async fn try_complete(
        &self,
        transaction_id: Uuid,
        actor: Uuid,
        gateway_ref: Option<&str>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let ledger = self.state.ledger();
        let tx = ledger.get(transaction_id).await?;
        let now = ledger.now();

        let mut events = Vec::new();
        let mut current = tx.clone();
        if current.status() == TransactionStatus::Pending {
            let event = current.transition(
                TransactionStatus::Processing,
                actor,
                Some("Payment received".to_string()),
                None,
                now,
            )?;
            current = current.apply(event.clone());
            events.push(event);
        }
        let event = current.transition(
            TransactionStatus::Completed,
            actor,
            Some("Transaction completed".to_string()),
            gateway_ref.map(str::to_string),
            now,
        )?;
        current = current.apply(event.clone());
        events.push(event);

        let mut batch = AppendBatch::new().with(AggregateOperation::for_aggregate(&tx, &events)?);
        let mut touched = vec![current.clone()];

        if let Some(loan_id) = repayment_loan(&current) {
            let loan = self.load_loan(loan_id).await?;
            let loan_events = loan.record_installment_paid(current.id(), now)?;
            batch.push(AggregateOperation::for_aggregate(&loan, &loan_events)?);

            if self.state.settings.allocation == AllocationRule::ProRata {
                for (transfer, transfer_events) in self.distribute(&loan, &current, now)? {
                    batch.push(AggregateOperation::create::<Transaction>(
                        transfer.id(),
                        &transfer_events,
                    )?);
                    touched.push(transfer);
                }
            }
        }

        ledger.commit(batch, &touched, context).await?;
        Ok(current)
    }

    /// Split a repayment's net amount across the lenders in proportion to
    /// their contributions, as internally settled transfers out of escrow
    fn distribute(
        &self,
        loan: &Loan,
        repayment: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Transaction, Vec<TransactionEvent>)>, DomainError> {
        let weights: Vec<i64> = loan
            .contributions()
            .iter()
            .map(|c| c.amount.minor())
            .collect();
        if weights.is_empty() || repayment.net_amount().is_zero() {
            return Ok(Vec::new());
        }
        let shares = repayment.net_amount().allocate(&weights)?;

        let ledger = self.state.ledger();
        let installment = repayment.installment_number();
        let mut transfers = Vec::with_capacity(shares.len());
        for (contribution, share) in loan.contributions().iter().zip(shares) {
            if share.is_zero() {
                continue;
            }
            let transfer = NewTransaction::new(
                loan.id(),
                contribution.lender_id,
                TransactionType::Transfer,
                share,
                PaymentMethod::Internal,
            )
            .for_loan(loan.id(), installment)
            .with_description(format!(
                "Repayment distribution for installment {}",
                installment.unwrap_or_default()
            ));
            transfers.push(ledger.prepare_settled(Uuid::new_v4(), transfer, SYSTEM_ACTOR, now)?);
        }
        Ok(transfers)
    }

    /// Move to `failed` or `cancelled`, releasing the linked installment
    async fn finish_closed(
        &self,
        transaction_id: Uuid,
        to: TransactionStatus,
        actor: Uuid,
        details: &str,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let tx = retry_on_conflict(&self.state.settings, transaction_id, move || {
            self.try_close(transaction_id, to, actor, details, context)
        })
        .await?;

        tracing::info!(
            transaction_id = %tx.id(),
            status = %tx.status(),
            details,
            "Transaction closed"
        );
        Ok(tx)
    }

    async fn try_close(
        &self,
        transaction_id: Uuid,
        to: TransactionStatus,
        actor: Uuid,
        details: &str,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let ledger = self.state.ledger();
        let tx = ledger.get(transaction_id).await?;
        let now = ledger.now();

        let event = tx.transition(to, actor, Some(details.to_string()), None, now)?;
        let mut batch =
            AppendBatch::new().with(AggregateOperation::for_aggregate(&tx, &[event.clone()])?);
        let tx = tx.apply(event);

        if let Some(loan_id) = repayment_loan(&tx) {
            let loan = self.load_loan(loan_id).await?;
            if let Some(released) = loan.release_repayment(tx.id(), now) {
                batch.push(AggregateOperation::for_aggregate(&loan, &[released])?);
            }
        }

        ledger.commit(batch, std::slice::from_ref(&tx), context).await?;
        Ok(tx)
    }

    async fn load_loan(&self, loan_id: Uuid) -> AppResult<Loan> {
        Ok(load_aggregate::<Loan>(self.state.store.as_ref(), loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(loan_id))?)
    }
}

fn repayment_loan(tx: &Transaction) -> Option<Uuid> {
    if tx.transaction_type() == TransactionType::LoanRepayment {
        tx.loan_id()
    } else {
        None
    }
}

fn validate_reason(reason: &str) -> Result<&str, DomainError> {
    let reason = reason.trim();
    let len = reason.chars().count();
    if len < REASON_LEN.0 || len > REASON_LEN.1 {
        return Err(DomainError::validation(
            "reason",
            format!(
                "must be between {} and {} characters",
                REASON_LEN.0, REASON_LEN.1
            ),
        ));
    }
    Ok(reason)
}
