//! Command definitions
//!
//! Commands represent intentions to change the system state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{LoanTermsInput, PaymentMethod, TransactionType};

// =========================================================================
// Loan lifecycle
// =========================================================================

/// Command to create a draft loan for the calling borrower
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLoanCommand {
    pub terms: LoanTermsInput,
}

impl CreateLoanCommand {
    pub fn new(terms: LoanTermsInput) -> Self {
        Self { terms }
    }
}

/// Command to edit a draft's title or description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDraftLoanCommand {
    pub loan_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl UpdateDraftLoanCommand {
    pub fn new(loan_id: Uuid) -> Self {
        Self {
            loan_id,
            title: None,
            description: None,
        }
    }

    pub fn with_title(mut self, title: String) -> Self {
        self.title = Some(title);
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Command to approve a pending loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveLoanCommand {
    pub loan_id: Uuid,
    /// Externally supplied score, 1 to 10
    pub risk_score: Option<u8>,
    pub note: Option<String>,
}

impl ApproveLoanCommand {
    pub fn new(loan_id: Uuid) -> Self {
        Self {
            loan_id,
            risk_score: None,
            note: None,
        }
    }

    pub fn with_risk_score(mut self, score: u8) -> Self {
        self.risk_score = Some(score);
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.note = Some(note);
        self
    }
}

/// Command carrying a mandatory reason (reject, default)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanReasonCommand {
    pub loan_id: Uuid,
    pub reason: String,
}

impl LoanReasonCommand {
    pub fn new(loan_id: Uuid, reason: String) -> Self {
        Self { loan_id, reason }
    }
}

// =========================================================================
// Funding and repayment
// =========================================================================

/// Command to contribute to a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundLoanCommand {
    pub loan_id: Uuid,
    pub lender_id: Uuid,
    /// Amount to contribute (as string for precise decimal)
    pub amount: String,
}

impl FundLoanCommand {
    pub fn new(loan_id: Uuid, lender_id: Uuid, amount: String) -> Self {
        Self {
            loan_id,
            lender_id,
            amount,
        }
    }
}

/// Command to pay one installment of an active loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRepaymentCommand {
    pub loan_id: Uuid,
    pub installment_number: u32,
    /// Amount paid (as string for precise decimal); must equal the amount due
    pub amount: String,
    pub payment_method: PaymentMethod,
}

impl RecordRepaymentCommand {
    pub fn new(
        loan_id: Uuid,
        installment_number: u32,
        amount: String,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            loan_id,
            installment_number,
            amount,
            payment_method,
        }
    }
}

// =========================================================================
// Transactions
// =========================================================================

/// Command to record a transaction outside the loan flows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionCommand {
    pub to_party: Uuid,
    pub transaction_type: TransactionType,
    pub amount: String,
    pub payment_method: PaymentMethod,
    pub description: Option<String>,
}

impl CreateTransactionCommand {
    pub fn new(
        to_party: Uuid,
        transaction_type: TransactionType,
        amount: String,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            to_party,
            transaction_type,
            amount,
            payment_method,
            description: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Command to confirm a transaction's payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTransactionCommand {
    pub transaction_id: Uuid,
    pub gateway_ref: Option<String>,
}

impl CompleteTransactionCommand {
    pub fn new(transaction_id: Uuid, gateway_ref: Option<String>) -> Self {
        Self {
            transaction_id,
            gateway_ref,
        }
    }
}

/// Command carrying a mandatory reason (cancel, refund)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReasonCommand {
    pub transaction_id: Uuid,
    pub reason: String,
}

impl TransactionReasonCommand {
    pub fn new(transaction_id: Uuid, reason: String) -> Self {
        Self {
            transaction_id,
            reason,
        }
    }
}

// =========================================================================
// Late fees
// =========================================================================

/// Command to assess overdue installments of every active loan
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssessLateFeesCommand {
    pub as_of: NaiveDate,
}

impl AssessLateFeesCommand {
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of }
    }
}

/// Outcome of a late-fee run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeReport {
    pub loans_checked: u32,
    pub installments_marked: u32,
    pub loans_defaulted: u32,
    /// Loans skipped after an error; retried on the next run
    pub loans_failed: u32,
}
