//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts that have happened in the system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;
use super::types::{
    Installment, LoanStatus, LoanTerms, PaymentMethod, TransactionStatus, TransactionType,
};

/// Common surface of persisted events
pub trait DomainEvent: Serialize {
    /// Stable name stored alongside the payload
    fn event_type(&self) -> &'static str;
}

/// Loan-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoanEvent {
    /// Borrower created a draft
    LoanCreated {
        loan_id: Uuid,
        borrower_id: Uuid,
        terms: LoanTerms,
        created_at: DateTime<Utc>,
    },

    /// Borrower edited a draft
    DraftUpdated {
        loan_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        updated_at: DateTime<Utc>,
    },

    /// Status moved along the lifecycle. The timeline is built from these.
    StatusChanged {
        loan_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
        actor: Uuid,
        note: String,
        changed_at: DateTime<Utc>,
    },

    /// Externally supplied risk score recorded at approval
    RiskAssessed {
        loan_id: Uuid,
        score: u8,
        assessed_by: Uuid,
        assessed_at: DateTime<Utc>,
    },

    FundingContributed {
        loan_id: Uuid,
        lender_id: Uuid,
        amount: Money,
        transaction_id: Uuid,
        contributed_at: DateTime<Utc>,
    },

    ScheduleMaterialized {
        loan_id: Uuid,
        installments: Vec<Installment>,
        monthly_payment: Money,
        total_interest: Money,
        materialized_at: DateTime<Utc>,
    },

    /// A repayment transaction claimed an installment
    RepaymentLinked {
        loan_id: Uuid,
        installment_number: u32,
        transaction_id: Uuid,
        linked_at: DateTime<Utc>,
    },

    /// The linked repayment was cancelled or failed
    RepaymentReleased {
        loan_id: Uuid,
        installment_number: u32,
        transaction_id: Uuid,
        released_at: DateTime<Utc>,
    },

    InstallmentPaid {
        loan_id: Uuid,
        installment_number: u32,
        transaction_id: Uuid,
        paid_at: DateTime<Utc>,
    },

    /// Installment passed its due date; the late fee is charged once
    InstallmentOverdue {
        loan_id: Uuid,
        installment_number: u32,
        late_fee: Money,
        marked_at: DateTime<Utc>,
    },
}

impl LoanEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LoanEvent::LoanCreated { .. } => "LoanCreated",
            LoanEvent::DraftUpdated { .. } => "DraftUpdated",
            LoanEvent::StatusChanged { .. } => "StatusChanged",
            LoanEvent::RiskAssessed { .. } => "RiskAssessed",
            LoanEvent::FundingContributed { .. } => "FundingContributed",
            LoanEvent::ScheduleMaterialized { .. } => "ScheduleMaterialized",
            LoanEvent::RepaymentLinked { .. } => "RepaymentLinked",
            LoanEvent::RepaymentReleased { .. } => "RepaymentReleased",
            LoanEvent::InstallmentPaid { .. } => "InstallmentPaid",
            LoanEvent::InstallmentOverdue { .. } => "InstallmentOverdue",
        }
    }

    /// Get the loan ID this event relates to
    pub fn loan_id(&self) -> Uuid {
        match self {
            LoanEvent::LoanCreated { loan_id, .. }
            | LoanEvent::DraftUpdated { loan_id, .. }
            | LoanEvent::StatusChanged { loan_id, .. }
            | LoanEvent::RiskAssessed { loan_id, .. }
            | LoanEvent::FundingContributed { loan_id, .. }
            | LoanEvent::ScheduleMaterialized { loan_id, .. }
            | LoanEvent::RepaymentLinked { loan_id, .. }
            | LoanEvent::RepaymentReleased { loan_id, .. }
            | LoanEvent::InstallmentPaid { loan_id, .. }
            | LoanEvent::InstallmentOverdue { loan_id, .. } => *loan_id,
        }
    }
}

impl DomainEvent for LoanEvent {
    fn event_type(&self) -> &'static str {
        LoanEvent::event_type(self)
    }
}

/// Ledger transaction events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionEvent {
    TransactionCreated {
        transaction_id: Uuid,
        reference: String,
        from_party: Uuid,
        to_party: Uuid,
        transaction_type: TransactionType,
        amount: Money,
        processing_fee: Money,
        payment_method: PaymentMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loan_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        installment_number: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        idempotency_key: Option<String>,
        created_by: Uuid,
        created_at: DateTime<Utc>,
        /// Hash of the `created` audit entry
        audit_hash: String,
    },

    TransactionStatusChanged {
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        actor: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway_ref: Option<String>,
        changed_at: DateTime<Utc>,
        /// Hash of the audit entry this transition appends
        audit_hash: String,
    },
}

impl TransactionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionCreated { .. } => "TransactionCreated",
            TransactionEvent::TransactionStatusChanged { .. } => "TransactionStatusChanged",
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        match self {
            TransactionEvent::TransactionCreated { transaction_id, .. }
            | TransactionEvent::TransactionStatusChanged { transaction_id, .. } => *transaction_id,
        }
    }
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        TransactionEvent::event_type(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    #[test]
    fn test_loan_event_serialization() {
        let event = LoanEvent::FundingContributed {
            loan_id: Uuid::new_v4(),
            lender_id: Uuid::new_v4(),
            amount: Money::from_minor(600000, Currency::Usd),
            transaction_id: Uuid::new_v4(),
            contributed_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FundingContributed");
        assert_eq!(json["amount"]["amount"], "6000.00");

        let back: LoanEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "FundingContributed");
        assert_eq!(back.loan_id(), event.loan_id());
    }

    #[test]
    fn test_transaction_status_changed_omits_empty_fields() {
        let event = TransactionEvent::TransactionStatusChanged {
            transaction_id: Uuid::new_v4(),
            from: TransactionStatus::Pending,
            to: TransactionStatus::Processing,
            actor: Uuid::new_v4(),
            details: None,
            gateway_ref: None,
            changed_at: Utc::now(),
            audit_hash: "00".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("gateway_ref").is_none());
        assert_eq!(json["to"], "processing");
    }
}
