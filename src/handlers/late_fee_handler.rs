//! Late Fee Handler
//!
//! Assesses overdue installments of every active loan as of a given date.
//! The core runs no timers; the server's scheduled job is one caller.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Loan};
use crate::domain::{DomainError, LoanEvent, LoanStatus, OperationContext};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, load_all, AggregateOperation, AppendBatch};
use crate::retry::retry_on_conflict;
use crate::state::AppState;

use super::{AssessLateFeesCommand, LateFeeReport};

/// Handler for late-fee assessment runs
pub struct AssessLateFeesHandler {
    state: AppState,
}

impl AssessLateFeesHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Execute the assessment for every active loan
    pub async fn execute(
        &self,
        command: AssessLateFeesCommand,
        context: &OperationContext,
    ) -> AppResult<LateFeeReport> {
        let principal = context.principal()?;
        if !principal.is_admin() {
            return Err(DomainError::Unauthorized(
                "only administrators can assess late fees".to_string(),
            )
            .into());
        }

        let mut report = LateFeeReport::default();
        let active: Vec<Loan> = load_all::<Loan>(self.state.store.as_ref())
            .await?
            .into_iter()
            .filter(|loan| loan.status() == LoanStatus::Active)
            .collect();

        for loan in active {
            let loan_id = loan.id();
            report.loans_checked += 1;

            let result = retry_on_conflict(&self.state.settings, loan_id, move || {
                self.try_assess(loan_id, command.as_of, context)
            })
            .await;
            // One loan failing must not leave the rest unassessed
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(loan_id = %loan_id, error = %e, "Late fee assessment failed");
                    report.loans_failed += 1;
                    continue;
                }
            };

            for event in &events {
                match event {
                    LoanEvent::InstallmentOverdue { .. } => report.installments_marked += 1,
                    LoanEvent::StatusChanged {
                        to: LoanStatus::Defaulted,
                        ..
                    } => {
                        report.loans_defaulted += 1;
                        tracing::warn!(loan_id = %loan_id, "Loan defaulted");
                    }
                    _ => {}
                }
            }
        }

        tracing::info!(
            as_of = %command.as_of,
            loans_checked = report.loans_checked,
            installments_marked = report.installments_marked,
            loans_defaulted = report.loans_defaulted,
            loans_failed = report.loans_failed,
            "Late fees assessed"
        );

        Ok(report)
    }

    async fn try_assess(
        &self,
        loan_id: Uuid,
        as_of: NaiveDate,
        context: &OperationContext,
    ) -> AppResult<Vec<LoanEvent>> {
        let Some(loan) = load_aggregate::<Loan>(self.state.store.as_ref(), loan_id).await? else {
            return Ok(Vec::new());
        };

        let events = loan.assess_overdue(
            as_of,
            &self.state.settings.late_fee,
            self.state.clock.now(),
        )?;
        if events.is_empty() {
            return Ok(events);
        }

        let batch = AppendBatch::new().with(AggregateOperation::for_aggregate(&loan, &events)?);
        self.state.store.append(batch, context).await?;
        Ok(events)
    }
}
