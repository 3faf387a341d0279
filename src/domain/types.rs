//! Domain value types
//!
//! Status enums, loan terms and the value objects owned by the Loan and
//! Transaction aggregates.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::money::{Money, MoneyError};

// =========================================================================
// Loan status
// =========================================================================

/// Lifecycle state of a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Draft,
    Pending,
    Approved,
    Funded,
    Active,
    Completed,
    Rejected,
    Cancelled,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Draft => "draft",
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Funded => "funded",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Cancelled => "cancelled",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Rejected)
                | (Pending, Funded)
                | (Approved, Funded)
                | (Funded, Active)
                | (Active, Completed)
                | (Active, Defaulted)
        )
    }

    /// Loans accept contributions only while pending or approved
    pub fn is_fundable(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed
                | LoanStatus::Rejected
                | LoanStatus::Cancelled
                | LoanStatus::Defaulted
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================================================================
// Loan terms
// =========================================================================

/// Whether a loan is backed by collateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanCategory {
    Unsecured,
    Secured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoanPurpose {
    Personal,
    Business,
    Education,
    Medical,
    HomeImprovement,
    DebtConsolidation,
    Emergency,
    Wedding,
    Vacation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollateralKind {
    RealEstate,
    Vehicle,
    Equipment,
    Jewelry,
    Other,
}

/// Unit in which a requested tenure is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenureUnit {
    #[default]
    Months,
    Years,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collateral {
    pub kind: CollateralKind,
    pub description: String,
    pub value: Money,
}

/// Validated loan terms. Only `validation::validate_terms` builds these from
/// caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub title: String,
    pub description: String,
    pub purpose: LoanPurpose,
    pub amount: Money,
    /// Nominal annual rate in percent
    pub interest_rate: Decimal,
    pub tenure_months: u32,
    pub category: LoanCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral: Option<Collateral>,
}

// =========================================================================
// Loan-owned value objects
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

/// One row of a repayment schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub principal: Money,
    pub interest: Money,
    pub status: InstallmentStatus,
    pub late_fee: Money,
    /// Repayment transaction linked to this installment, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Installment {
    /// Scheduled payment without fees
    pub fn scheduled_amount(&self) -> Result<Money, MoneyError> {
        self.principal.checked_add(self.interest)
    }

    /// What the borrower must pay to settle this installment
    pub fn amount_due(&self) -> Result<Money, MoneyError> {
        self.scheduled_amount()?.checked_add(self.late_fee)
    }

    pub fn is_paid(&self) -> bool {
        self.status == InstallmentStatus::Paid
    }

    /// Unpaid and not already claimed by a repayment in flight
    pub fn is_open(&self) -> bool {
        !self.is_paid() && self.transaction_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingContribution {
    pub lender_id: Uuid,
    pub amount: Money,
    pub contributed_at: DateTime<Utc>,
    pub transaction_id: Uuid,
}

/// Status-change note on a loan's timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub from: LoanStatus,
    pub to: LoanStatus,
    pub actor: Uuid,
    pub note: String,
    pub at: DateTime<Utc>,
}

// =========================================================================
// Transaction vocabulary
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    LoanFunding,
    LoanRepayment,
    InterestPayment,
    LateFee,
    Refund,
    Penalty,
    Withdrawal,
    Deposit,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::LoanFunding => "loan-funding",
            TransactionType::LoanRepayment => "loan-repayment",
            TransactionType::InterestPayment => "interest-payment",
            TransactionType::LateFee => "late-fee",
            TransactionType::Refund => "refund",
            TransactionType::Penalty => "penalty",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Deposit => "deposit",
            TransactionType::Transfer => "transfer",
        }
    }

    /// Types whose money is part of a loan's funding or repayment flow
    pub fn is_loan_flow(&self) -> bool {
        matches!(
            self,
            TransactionType::LoanFunding
                | TransactionType::LoanRepayment
                | TransactionType::InterestPayment
                | TransactionType::LateFee
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Pending, Cancelled)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }

    /// Still able to reach `completed`
    pub fn is_live(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Processing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    BankTransfer,
    CreditCard,
    DebitCard,
    Check,
    Wallet,
    Crypto,
    /// Settled inside the ledger without a gateway call
    Internal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank-transfer",
            PaymentMethod::CreditCard => "credit-card",
            PaymentMethod::DebitCard => "debit-card",
            PaymentMethod::Check => "check",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Internal => "internal",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    #[test]
    fn test_loan_status_edges() {
        assert!(LoanStatus::Draft.can_transition_to(LoanStatus::Pending));
        assert!(LoanStatus::Approved.can_transition_to(LoanStatus::Funded));
        assert!(LoanStatus::Active.can_transition_to(LoanStatus::Defaulted));

        assert!(!LoanStatus::Draft.can_transition_to(LoanStatus::Approved));
        assert!(!LoanStatus::Funded.can_transition_to(LoanStatus::Rejected));
        assert!(!LoanStatus::Completed.can_transition_to(LoanStatus::Active));
    }

    #[test]
    fn test_transaction_status_edges() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn test_installment_amount_due() {
        let installment = Installment {
            number: 1,
            due_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            principal: Money::from_minor(81066, Currency::Usd),
            interest: Money::from_minor(5000, Currency::Usd),
            status: InstallmentStatus::Overdue,
            late_fee: Money::from_minor(4303, Currency::Usd),
            transaction_id: None,
            paid_at: None,
        };
        assert_eq!(
            installment.amount_due().unwrap(),
            Money::from_minor(90369, Currency::Usd)
        );
        assert!(installment.is_open());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransactionType::LoanRepayment).unwrap(),
            r#""loan-repayment""#
        );
        assert_eq!(
            serde_json::to_string(&LoanPurpose::DebtConsolidation).unwrap(),
            r#""debt-consolidation""#
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::BankTransfer).unwrap(),
            r#""bank-transfer""#
        );
        assert_eq!(LoanStatus::Defaulted.to_string(), "defaulted");
    }
}
