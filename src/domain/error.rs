//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::money::{Money, MoneyError};
use super::types::{LoanStatus, TransactionStatus};

/// A single field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Caller input failed per-field validation
    #[error("Validation failed: {}", format_violations(.0))]
    ValidationFailed(Vec<FieldViolation>),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid loan terms: {0}")]
    InvalidTerms(String),

    /// The loan's current status does not permit the action
    #[error("Cannot {action} a loan in status {status}")]
    IllegalLoanState { status: LoanStatus, action: String },

    #[error("Illegal transaction transition: {from} -> {to}")]
    IllegalTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Contribution of {requested} exceeds remaining {remaining}")]
    OverfundingRejected { requested: Money, remaining: Money },

    #[error("Lender {lender} has already funded this loan")]
    DuplicateLender { lender: Uuid },

    #[error("Loan is not open for funding (status {status})")]
    NotFundable { status: LoanStatus },

    #[error("Loan is not active (status {status})")]
    LoanNotActive { status: LoanStatus },

    #[error("Only the borrower can perform this action")]
    NotBorrower,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// The payment gateway did not answer in time; the transaction is failed
    #[error("Payment gateway timed out for transaction {transaction_id}")]
    GatewayTimeout { transaction_id: Uuid },

    /// Optimistic concurrency retries were exhausted
    #[error("Concurrent modification of {aggregate_id}, retry later")]
    PersistenceConflict { aggregate_id: Uuid },

    #[error("Idempotency key {key} was used with a different request")]
    IdempotencyConflict { key: String },
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![FieldViolation::new(field, message)])
    }

    pub fn illegal_state(status: LoanStatus, action: impl Into<String>) -> Self {
        Self::IllegalLoanState {
            status,
            action: action.into(),
        }
    }

    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed(_)
                | Self::InvalidAmount(_)
                | Self::InvalidTerms(_)
                | Self::IllegalLoanState { .. }
                | Self::IllegalTransition { .. }
                | Self::OverfundingRejected { .. }
                | Self::DuplicateLender { .. }
                | Self::NotFundable { .. }
                | Self::LoanNotActive { .. }
                | Self::NotBorrower
                | Self::Unauthorized(_)
                | Self::IdempotencyConflict { .. }
        )
    }

    /// Transient failures; retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTimeout { .. } | Self::PersistenceConflict { .. }
        )
    }
}

impl From<MoneyError> for DomainError {
    fn from(err: MoneyError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    #[test]
    fn test_overfunding_error() {
        let err = DomainError::OverfundingRejected {
            requested: Money::from_minor(60000, Currency::Usd),
            remaining: Money::from_minor(50000, Currency::Usd),
        };

        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("600.00"));
        assert!(err.to_string().contains("500.00"));
    }

    #[test]
    fn test_validation_message_lists_fields() {
        let err = DomainError::ValidationFailed(vec![
            FieldViolation::new("title", "too short"),
            FieldViolation::new("amount", "below minimum"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: title: too short; amount: below minimum"
        );
    }

    #[test]
    fn test_transient_errors() {
        let err = DomainError::PersistenceConflict {
            aggregate_id: Uuid::new_v4(),
        };
        assert!(!err.is_client_error());
        assert!(err.is_retryable());

        let err = DomainError::GatewayTimeout {
            transaction_id: Uuid::new_v4(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_money_error_maps_to_invalid_amount() {
        let err: DomainError = MoneyError::Overflow.into();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }
}
