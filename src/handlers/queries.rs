//! Query handlers
//!
//! Read-side operations. Loans and transactions are rebuilt from the event
//! stream; balances come from the balance engine's cache.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::aggregate::Loan;
use crate::audit::ChainVerificationResult;
use crate::domain::{
    DomainError, LoanCategory, LoanPurpose, LoanStatus, OperationContext, Principal, Role,
    TransactionStatus, TransactionType,
};
use crate::error::AppResult;
use crate::event_store::{load_aggregate, load_all};
use crate::ledger::{TransactionFilter, TransactionStats};
use crate::state::AppState;

use super::views::{BalanceView, LoanPage, LoanView, TransactionView};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filters and pagination of `ListLoans`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFilter {
    pub status: Option<LoanStatus>,
    pub purpose: Option<LoanPurpose>,
    pub category: Option<LoanCategory>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub min_rate: Option<Decimal>,
    pub max_rate: Option<Decimal>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl LoanFilter {
    fn matches(&self, loan: &Loan) -> bool {
        let terms = loan.terms();
        let amount = terms.amount.to_decimal();
        self.status.map_or(true, |s| loan.status() == s)
            && self.purpose.map_or(true, |p| terms.purpose == p)
            && self.category.map_or(true, |c| terms.category == c)
            && self.min_amount.map_or(true, |min| amount >= min)
            && self.max_amount.map_or(true, |max| amount <= max)
            && self.min_rate.map_or(true, |min| terms.interest_rate >= min)
            && self.max_rate.map_or(true, |max| terms.interest_rate <= max)
    }
}

/// Filters of `ListTransactions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    /// Party to list for; defaults to the caller, others require admin
    pub party: Option<Uuid>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub loan_id: Option<Uuid>,
}

/// Whether a loan appears in a principal's listing
///
/// Borrowers see their own loans, lenders the loans they funded or that are
/// open for funding, and admins everything.
fn listed_for(loan: &Loan, principal: &Principal) -> bool {
    let own = loan.borrower_id() == principal.user_id;
    let lending = loan.has_contributed(principal.user_id) || loan.status().is_fundable();
    match principal.role {
        Role::Admin | Role::System => true,
        Role::Borrower => own,
        Role::Lender => lending,
        Role::Both => own || lending,
    }
}

// =========================================================================
// Loans
// =========================================================================

pub struct LoanQueryHandler {
    state: AppState,
}

impl LoanQueryHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// `GetLoanView`
    pub async fn get(&self, loan_id: Uuid, context: &OperationContext) -> AppResult<LoanView> {
        let principal = context.principal()?;
        let loan: Loan = load_aggregate(self.state.store.as_ref(), loan_id)
            .await?
            .ok_or(DomainError::LoanNotFound(loan_id))?;

        if !loan.is_visible_to(&principal) {
            return Err(DomainError::Unauthorized("access to this loan denied".to_string()).into());
        }
        Ok(LoanView::from_loan(&loan)?)
    }

    /// `ListLoans`, newest first
    pub async fn list(&self, filter: &LoanFilter, context: &OperationContext) -> AppResult<LoanPage> {
        let principal = context.principal()?;
        let page = filter.page.unwrap_or(1).max(1);
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut loans: Vec<Loan> = load_all::<Loan>(self.state.store.as_ref())
            .await?
            .into_iter()
            .filter(|loan| listed_for(loan, &principal) && filter.matches(loan))
            .collect();
        loans.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let total = loans.len();
        let skip = (page as usize - 1).saturating_mul(limit as usize);
        let loans = loans
            .iter()
            .skip(skip)
            .take(limit as usize)
            .map(LoanView::from_loan)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LoanPage {
            loans,
            total,
            page,
            limit,
        })
    }
}

// =========================================================================
// Transactions and balances
// =========================================================================

pub struct TransactionQueryHandler {
    state: AppState,
}

impl TransactionQueryHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// `GetTransaction`, for involved parties and admins
    pub async fn get(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<TransactionView> {
        let principal = context.principal()?;
        let tx = self.state.ledger().get(transaction_id).await?;
        if !principal.is_admin() && !tx.involves(principal.user_id) {
            return Err(DomainError::Unauthorized(
                "access to this transaction denied".to_string(),
            )
            .into());
        }
        Ok(TransactionView::from(&tx))
    }

    /// `ListTransactions`, newest first
    pub async fn list(
        &self,
        query: &TransactionQuery,
        context: &OperationContext,
    ) -> AppResult<Vec<TransactionView>> {
        let principal = context.principal()?;
        let party = resolve_party(&principal, query.party)?;
        let transactions = self
            .state
            .ledger()
            .list(&TransactionFilter {
                party: Some(party),
                transaction_type: query.transaction_type,
                status: query.status,
                loan_id: query.loan_id,
            })
            .await?;
        Ok(transactions.iter().map(TransactionView::from).collect())
    }

    /// `TransactionStats`
    pub async fn stats(
        &self,
        party: Option<Uuid>,
        context: &OperationContext,
    ) -> AppResult<TransactionStats> {
        let principal = context.principal()?;
        let party = resolve_party(&principal, party)?;
        self.state.ledger().stats(party).await
    }

    /// `GetBalance`
    pub async fn balance(
        &self,
        party: Option<Uuid>,
        context: &OperationContext,
    ) -> AppResult<BalanceView> {
        let principal = context.principal()?;
        let party = resolve_party(&principal, party)?;
        let balance = self.state.balances.balance(party).await?;
        Ok(BalanceView {
            party_id: party,
            balance,
        })
    }

    /// Re-hash a transaction's audit trail
    pub async fn verify_audit(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> AppResult<ChainVerificationResult> {
        let principal = context.principal()?;
        let tx = self.state.ledger().get(transaction_id).await?;
        if !principal.is_admin() && !tx.involves(principal.user_id) {
            return Err(DomainError::Unauthorized(
                "access to this transaction denied".to_string(),
            )
            .into());
        }

        let result = tx.verify_audit();
        if !result.is_valid {
            tracing::error!(
                transaction_id = %transaction_id,
                first_invalid_entry = ?result.first_invalid_entry,
                "Audit trail verification failed"
            );
        }
        Ok(result)
    }
}

/// The caller's own id unless an admin asks about someone else
fn resolve_party(principal: &Principal, requested: Option<Uuid>) -> Result<Uuid, DomainError> {
    match requested {
        None => Ok(principal.user_id),
        Some(party) if party == principal.user_id || principal.is_admin() => Ok(party),
        Some(_) => Err(DomainError::Unauthorized(
            "only administrators can query other parties".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_party() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let lender = Principal::new(me, Role::Lender);
        let admin = Principal::new(me, Role::Admin);

        assert_eq!(resolve_party(&lender, None).unwrap(), me);
        assert_eq!(resolve_party(&lender, Some(me)).unwrap(), me);
        assert!(resolve_party(&lender, Some(other)).is_err());
        assert_eq!(resolve_party(&admin, Some(other)).unwrap(), other);
    }
}
