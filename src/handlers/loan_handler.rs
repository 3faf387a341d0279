//! Loan Handlers
//!
//! Creation, draft editing and the administrative and borrower-driven
//! lifecycle transitions. Every transition is a single load-decide-append
//! cycle at the loan's loaded version, retried on concurrent modification.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Loan};
use crate::domain::validation::validate_draft_update;
use crate::domain::{validate_terms, DomainError, LoanEvent, OperationContext, Principal};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, AggregateOperation, AppendBatch};
use crate::retry::retry_on_conflict;
use crate::state::AppState;

use super::views::LoanView;
use super::{ApproveLoanCommand, CreateLoanCommand, LoanReasonCommand, UpdateDraftLoanCommand};

// =========================================================================
// CreateLoanHandler
// =========================================================================

/// Handler for loan creation
pub struct CreateLoanHandler {
    state: AppState,
}

impl CreateLoanHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Validate the terms and create a draft owned by the caller
    pub async fn execute(
        &self,
        command: CreateLoanCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = context.principal()?;
        if !principal.role.can_borrow() {
            return Err(
                DomainError::Unauthorized("only borrowers can create loans".to_string()).into(),
            );
        }

        let terms = validate_terms(&command.terms, self.state.settings.currency)?;

        let loan_id = Uuid::new_v4();
        let (loan, event) = Loan::create(loan_id, principal.user_id, terms, self.state.clock.now());
        let batch = AppendBatch::new().with(AggregateOperation::create::<Loan>(loan_id, &[event])?);
        self.state.store.append(batch, context).await?;

        tracing::info!(
            loan_id = %loan_id,
            borrower_id = %principal.user_id,
            amount = %loan.amount(),
            "Loan draft created"
        );

        Ok(LoanView::from_loan(&loan)?)
    }
}

// =========================================================================
// LoanLifecycleHandler
// =========================================================================

/// Handler for every command that moves an existing loan
pub struct LoanLifecycleHandler {
    state: AppState,
}

impl LoanLifecycleHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Borrower edits a draft
    pub async fn update_draft(
        &self,
        command: UpdateDraftLoanCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = context.principal()?;
        let (title, description) =
            validate_draft_update(command.title.as_deref(), command.description.as_deref())?;
        let (title, description) = (&title, &description);

        self.run(command.loan_id, "edit", context, |loan, now| {
            loan.update_draft(principal.user_id, title.clone(), description.clone(), now)
                .map(|e| vec![e])
        })
        .await
    }

    /// draft → pending
    pub async fn submit(&self, loan_id: Uuid, context: &OperationContext) -> AppResult<LoanView> {
        let principal = context.principal()?;
        self.run(loan_id, "submit", context, |loan, now| {
            loan.submit(principal.user_id, now).map(|e| vec![e])
        })
        .await
    }

    /// pending → approved
    pub async fn approve(
        &self,
        command: ApproveLoanCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = require_admin(context, "approve loans")?;
        let note = &command.note;
        self.run(command.loan_id, "approve", context, |loan, now| {
            loan.approve(principal.user_id, command.risk_score, note.clone(), now)
        })
        .await
    }

    /// pending|approved → rejected
    pub async fn reject(
        &self,
        command: LoanReasonCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = require_admin(context, "reject loans")?;
        let reason = command.reason.as_str();
        self.run(command.loan_id, "reject", context, |loan, now| {
            loan.reject(principal.user_id, reason, now).map(|e| vec![e])
        })
        .await
    }

    /// draft → cancelled
    pub async fn delete_draft(
        &self,
        loan_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = context.principal()?;
        self.run(loan_id, "delete", context, |loan, now| {
            loan.cancel_draft(principal.user_id, now).map(|e| vec![e])
        })
        .await
    }

    /// active → defaulted
    pub async fn mark_defaulted(
        &self,
        command: LoanReasonCommand,
        context: &OperationContext,
    ) -> AppResult<LoanView> {
        let principal = require_admin(context, "default loans")?;
        let reason = command.reason.as_str();
        self.run(command.loan_id, "default", context, |loan, now| {
            loan.mark_defaulted(principal.user_id, reason, now).map(|e| vec![e])
        })
        .await
    }

    async fn run<F>(
        &self,
        loan_id: Uuid,
        action: &str,
        context: &OperationContext,
        decide: F,
    ) -> AppResult<LoanView>
    where
        F: Fn(&Loan, DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> + Sync,
    {
        let decide = &decide;
        let loan = retry_on_conflict(&self.state.settings, loan_id, move || {
            self.try_run(loan_id, context, decide)
        })
        .await?;

        tracing::info!(
            loan_id = %loan_id,
            action,
            status = %loan.status(),
            "Loan updated"
        );

        Ok(LoanView::from_loan(&loan)?)
    }

    async fn try_run<F>(
        &self,
        loan_id: Uuid,
        context: &OperationContext,
        decide: &F,
    ) -> AppResult<Loan>
    where
        F: Fn(&Loan, DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> + Sync,
    {
        let loan: Loan = load_aggregate(self.state.store.as_ref(), loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(loan_id))?;

        let events = decide(&loan, self.state.clock.now())?;
        let batch = AppendBatch::new().with(AggregateOperation::for_aggregate(&loan, &events)?);
        self.state.store.append(batch, context).await?;

        Ok(loan.apply_all(events))
    }
}

fn require_admin(context: &OperationContext, action: &str) -> Result<Principal, DomainError> {
    let principal = context.principal()?;
    if !principal.is_admin() {
        return Err(DomainError::Unauthorized(format!(
            "only administrators can {}",
            action
        )));
    }
    Ok(principal)
}
