//! Funding Handler
//!
//! Handles lender contributions to loans open for funding.

use crate::domain::{DomainError, Money, OperationContext};
use crate::error::AppResult;
use crate::funding::FundingResult;
use crate::state::AppState;

use super::FundLoanCommand;

/// Handler for loan funding
pub struct FundLoanHandler {
    state: AppState,
}

impl FundLoanHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Execute the funding command
    pub async fn execute(
        &self,
        command: FundLoanCommand,
        context: &OperationContext,
    ) -> AppResult<FundingResult> {
        let principal = context.principal()?;
        if !principal.role.can_lend() {
            return Err(DomainError::Unauthorized("only lenders can fund loans".to_string()).into());
        }
        if principal.user_id != command.lender_id {
            return Err(DomainError::Unauthorized(
                "lenders can only contribute on their own behalf".to_string(),
            )
            .into());
        }

        let amount = Money::parse(&command.amount, self.state.settings.currency)?;

        self.state
            .funding()
            .contribute(command.loan_id, command.lender_id, amount, context)
            .await
    }
}
