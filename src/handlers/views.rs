//! Read models returned by handlers and the API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Loan, LoanFigures, Transaction};
use crate::audit::AuditEntry;
use crate::domain::{
    Collateral, DomainError, FundingContribution, Installment, LoanCategory, LoanPurpose,
    LoanStatus, Money, PaymentMethod, TimelineEntry, TransactionStatus, TransactionType,
};

/// A loan as seen by its borrower, lenders and admins
#[derive(Debug, Clone, Serialize)]
pub struct LoanView {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub title: String,
    pub description: String,
    pub purpose: LoanPurpose,
    pub amount: Money,
    pub interest_rate: Decimal,
    pub tenure_months: u32,
    pub category: LoanCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral: Option<Collateral>,
    pub status: LoanStatus,
    pub funded_amount: Money,
    pub figures: LoanFigures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    pub contributions: Vec<FundingContribution>,
    pub schedule: Vec<Installment>,
    pub timeline: Vec<TimelineEntry>,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LoanView {
    pub fn from_loan(loan: &Loan) -> Result<Self, DomainError> {
        let terms = loan.terms();
        Ok(Self {
            id: loan.id(),
            borrower_id: loan.borrower_id(),
            title: terms.title.clone(),
            description: terms.description.clone(),
            purpose: terms.purpose,
            amount: terms.amount,
            interest_rate: terms.interest_rate,
            tenure_months: terms.tenure_months,
            category: terms.category,
            collateral: terms.collateral.clone(),
            status: loan.status(),
            funded_amount: loan.funded_amount(),
            figures: loan.figures()?,
            risk_score: loan.risk_score(),
            contributions: loan.contributions().to_vec(),
            schedule: loan.schedule().to_vec(),
            timeline: loan.timeline().to_vec(),
            version: loan.version(),
            created_at: loan.created_at(),
            updated_at: loan.updated_at(),
        })
    }
}

/// Page of a loan listing
#[derive(Debug, Clone, Serialize)]
pub struct LoanPage {
    pub loans: Vec<LoanView>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

/// A ledger transaction with its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub reference: String,
    pub from_party: Uuid,
    pub to_party: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub processing_fee: Money,
    pub net_amount: Money,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub audit_trail: Vec<AuditEntry>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id(),
            reference: tx.reference().to_string(),
            from_party: tx.from_party(),
            to_party: tx.to_party(),
            transaction_type: tx.transaction_type(),
            amount: tx.amount(),
            processing_fee: tx.processing_fee(),
            net_amount: tx.net_amount(),
            payment_method: tx.payment_method(),
            status: tx.status(),
            loan_id: tx.loan_id(),
            installment_number: tx.installment_number(),
            description: tx.description().map(str::to_string),
            gateway_ref: tx.gateway_ref().map(str::to_string),
            created_at: tx.created_at(),
            processed_at: tx.processed_at(),
            completed_at: tx.completed_at(),
            audit_trail: tx.audit_trail().entries().to_vec(),
        }
    }
}

/// Result of recording a repayment
#[derive(Debug, Clone, Serialize)]
pub struct RepaymentResult {
    pub transaction: TransactionView,
    /// An earlier request with the same idempotency key created it
    pub replayed: bool,
}

/// Balance of one party
#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub party_id: Uuid,
    pub balance: Money,
}
