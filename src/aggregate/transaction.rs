//! Transaction Aggregate
//!
//! A ledger transaction moving money between two parties. Every state change
//! appends one entry to the transaction's hash-chained audit trail; the hash
//! is computed when the command is decided and carried in the event.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditRecord, AuditTrail, ChainVerificationResult};
use crate::domain::{
    Currency, DomainError, Money, PaymentMethod, TransactionEvent, TransactionStatus,
    TransactionType,
};

use super::Aggregate;

const REFERENCE_SUFFIX_LEN: usize = 8;

/// Parameters of a transaction about to be appended to the ledger
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_party: Uuid,
    pub to_party: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub processing_fee: Money,
    pub payment_method: PaymentMethod,
    pub loan_id: Option<Uuid>,
    pub installment_number: Option<u32>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewTransaction {
    /// Fee-free transfer between two parties
    pub fn new(
        from_party: Uuid,
        to_party: Uuid,
        transaction_type: TransactionType,
        amount: Money,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            from_party,
            to_party,
            transaction_type,
            amount,
            processing_fee: Money::zero(amount.currency()),
            payment_method,
            loan_id: None,
            installment_number: None,
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_fee(mut self, fee: Money) -> Self {
        self.processing_fee = fee;
        self
    }

    pub fn for_loan(mut self, loan_id: Uuid, installment_number: Option<u32>) -> Self {
        self.loan_id = Some(loan_id);
        self.installment_number = installment_number;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }
}

/// Unique human-readable reference, e.g. `REF-20260301120000-K3J9QX2A`
pub fn generate_reference(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("REF-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Transaction Aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: Uuid,
    reference: String,
    from_party: Uuid,
    to_party: Uuid,
    transaction_type: TransactionType,
    amount: Money,
    processing_fee: Money,
    net_amount: Money,
    payment_method: PaymentMethod,
    status: TransactionStatus,
    loan_id: Option<Uuid>,
    installment_number: Option<u32>,
    description: Option<String>,
    idempotency_key: Option<String>,
    gateway_ref: Option<String>,
    created_by: Uuid,
    created_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    audit: AuditTrail,
    version: i64,
}

impl Default for Transaction {
    fn default() -> Self {
        let zero = Money::zero(Currency::default());
        Self {
            id: Uuid::nil(),
            reference: String::new(),
            from_party: Uuid::nil(),
            to_party: Uuid::nil(),
            transaction_type: TransactionType::Transfer,
            amount: zero,
            processing_fee: zero,
            net_amount: zero,
            payment_method: PaymentMethod::Internal,
            status: TransactionStatus::Pending,
            loan_id: None,
            installment_number: None,
            description: None,
            idempotency_key: None,
            gateway_ref: None,
            created_by: Uuid::nil(),
            created_at: None,
            processed_at: None,
            completed_at: None,
            updated_at: None,
            audit: AuditTrail::default(),
            version: 0,
        }
    }
}

impl Transaction {
    // =========================================================================
    // Commands
    // =========================================================================

    /// Validate and create a pending transaction with its `created` audit entry
    pub fn create(
        transaction_id: Uuid,
        new: NewTransaction,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Self, TransactionEvent), DomainError> {
        let amount = new.amount.positive()?;
        if new.processing_fee.currency() != amount.currency() {
            return Err(DomainError::InvalidAmount(format!(
                "processing fee currency {} does not match {}",
                new.processing_fee.currency(),
                amount.currency()
            )));
        }
        if new.processing_fee.is_negative() || new.processing_fee.checked_cmp(&amount)?.is_gt() {
            return Err(DomainError::validation(
                "processing_fee",
                "must be between zero and the amount",
            ));
        }
        if new.from_party == new.to_party {
            return Err(DomainError::validation(
                "to",
                "source and destination must differ",
            ));
        }

        let record = AuditRecord {
            action: AuditAction::Created,
            performed_by: actor,
            previous_status: None,
            new_status: TransactionStatus::Pending,
            details: new.description.clone(),
            timestamp: now,
        };
        let audit_hash = AuditTrail::new(transaction_id).next_hash(&record);

        let event = TransactionEvent::TransactionCreated {
            transaction_id,
            reference: generate_reference(now),
            from_party: new.from_party,
            to_party: new.to_party,
            transaction_type: new.transaction_type,
            amount,
            processing_fee: new.processing_fee,
            payment_method: new.payment_method,
            loan_id: new.loan_id,
            installment_number: new.installment_number,
            description: new.description,
            idempotency_key: new.idempotency_key,
            created_by: actor,
            created_at: now,
            audit_hash,
        };

        let transaction = Transaction::default().apply(event.clone());
        Ok((transaction, event))
    }

    /// Move to `to` if the status machine allows it
    pub fn transition(
        &self,
        to: TransactionStatus,
        actor: Uuid,
        details: Option<String>,
        gateway_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransactionEvent, DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::IllegalTransition {
                from: self.status,
                to,
            });
        }

        let record = AuditRecord {
            action: AuditAction::StatusChanged,
            performed_by: actor,
            previous_status: Some(self.status),
            new_status: to,
            details: details.clone(),
            timestamp: now,
        };
        let audit_hash = self.audit.next_hash(&record);

        Ok(TransactionEvent::TransactionStatusChanged {
            transaction_id: self.id,
            from: self.status,
            to,
            actor,
            details,
            gateway_ref,
            changed_at: now,
            audit_hash,
        })
    }

    /// Re-hash the audit trail and check its linkage
    pub fn verify_audit(&self) -> ChainVerificationResult {
        self.audit.verify()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn involves(&self, party: Uuid) -> bool {
        self.from_party == party || self.to_party == party
    }

    /// Signed effect of this transaction on `party`'s balance
    ///
    /// Only completed transactions count.
    pub fn balance_delta(&self, party: Uuid) -> Money {
        let zero = Money::zero(self.net_amount.currency());
        if self.status != TransactionStatus::Completed {
            return zero;
        }
        let mut delta = 0i64;
        if self.to_party == party {
            delta += self.net_amount.minor();
        }
        if self.from_party == party {
            delta -= self.net_amount.minor();
        }
        Money::from_minor(delta, zero.currency())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn from_party(&self) -> Uuid {
        self.from_party
    }

    pub fn to_party(&self) -> Uuid {
        self.to_party
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn processing_fee(&self) -> Money {
        self.processing_fee
    }

    pub fn net_amount(&self) -> Money {
        self.net_amount
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn loan_id(&self) -> Option<Uuid> {
        self.loan_id
    }

    pub fn installment_number(&self) -> Option<u32> {
        self.installment_number
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn gateway_ref(&self) -> Option<&str> {
        self.gateway_ref.as_deref()
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }
}

impl Aggregate for Transaction {
    type Event = TransactionEvent;

    fn aggregate_type() -> &'static str {
        "Transaction"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            TransactionEvent::TransactionCreated {
                transaction_id,
                reference,
                from_party,
                to_party,
                transaction_type,
                amount,
                processing_fee,
                payment_method,
                loan_id,
                installment_number,
                description,
                idempotency_key,
                created_by,
                created_at,
                audit_hash,
            } => {
                self.id = transaction_id;
                self.reference = reference;
                self.from_party = from_party;
                self.to_party = to_party;
                self.transaction_type = transaction_type;
                self.amount = amount;
                self.processing_fee = processing_fee;
                self.net_amount = match amount.checked_sub(processing_fee) {
                    Ok(net) => net,
                    Err(e) => {
                        tracing::error!(
                            transaction_id = %transaction_id,
                            "Invalid fee during replay: {}",
                            e
                        );
                        amount
                    }
                };
                self.payment_method = payment_method;
                self.status = TransactionStatus::Pending;
                self.loan_id = loan_id;
                self.installment_number = installment_number;
                self.idempotency_key = idempotency_key;
                self.created_by = created_by;
                self.created_at = Some(created_at);
                self.updated_at = Some(created_at);

                self.audit = AuditTrail::new(transaction_id);
                self.audit.push(
                    AuditRecord {
                        action: AuditAction::Created,
                        performed_by: created_by,
                        previous_status: None,
                        new_status: TransactionStatus::Pending,
                        details: description.clone(),
                        timestamp: created_at,
                    },
                    audit_hash,
                );
                self.description = description;
            }

            TransactionEvent::TransactionStatusChanged {
                from,
                to,
                actor,
                details,
                gateway_ref,
                changed_at,
                audit_hash,
                ..
            } => {
                self.status = to;
                match to {
                    TransactionStatus::Processing => self.processed_at = Some(changed_at),
                    TransactionStatus::Completed => {
                        self.completed_at = Some(changed_at);
                        if gateway_ref.is_some() {
                            self.gateway_ref = gateway_ref;
                        }
                    }
                    _ => {}
                }
                self.updated_at = Some(changed_at);
                self.audit.push(
                    AuditRecord {
                        action: AuditAction::StatusChanged,
                        performed_by: actor,
                        previous_status: Some(from),
                        new_status: to,
                        details,
                        timestamp: changed_at,
                    },
                    audit_hash,
                );
            }
        }

        self.version += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Usd)
    }

    fn pending(from: Uuid, to: Uuid) -> Transaction {
        let new = NewTransaction::new(
            from,
            to,
            TransactionType::Deposit,
            usd(10_000),
            PaymentMethod::BankTransfer,
        )
        .with_fee(usd(250));
        let (tx, _) = Transaction::create(Uuid::new_v4(), new, from, Utc::now()).unwrap();
        tx
    }

    fn advance(tx: Transaction, to: TransactionStatus) -> Transaction {
        let event = tx
            .transition(to, Uuid::new_v4(), None, Some("gw-1".to_string()), Utc::now())
            .unwrap();
        tx.apply(event)
    }

    #[test]
    fn test_create_pending_with_reference() {
        let tx = pending(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(tx.status(), TransactionStatus::Pending);
        assert_eq!(tx.net_amount(), usd(9_750));
        assert!(tx.reference().starts_with("REF-"));
        assert_eq!(tx.audit_trail().len(), 1);
        assert_eq!(tx.audit_trail().entries()[0].action, AuditAction::Created);
    }

    #[test]
    fn test_references_are_unique() {
        let party = Uuid::new_v4();
        let a = pending(party, Uuid::new_v4());
        let b = pending(party, Uuid::new_v4());
        assert_ne!(a.reference(), b.reference());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let party = Uuid::new_v4();
        let same = NewTransaction::new(
            party,
            party,
            TransactionType::Transfer,
            usd(100),
            PaymentMethod::Internal,
        );
        assert!(Transaction::create(Uuid::new_v4(), same, party, Utc::now()).is_err());

        let zero = NewTransaction::new(
            party,
            Uuid::new_v4(),
            TransactionType::Transfer,
            usd(0),
            PaymentMethod::Internal,
        );
        assert!(matches!(
            Transaction::create(Uuid::new_v4(), zero, party, Utc::now()),
            Err(DomainError::InvalidAmount(_))
        ));

        let fee_too_large = NewTransaction::new(
            party,
            Uuid::new_v4(),
            TransactionType::Transfer,
            usd(100),
            PaymentMethod::Internal,
        )
        .with_fee(usd(101));
        assert!(matches!(
            Transaction::create(Uuid::new_v4(), fee_too_large, party, Utc::now()),
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_happy_path_sets_timestamps() {
        let tx = pending(Uuid::new_v4(), Uuid::new_v4());
        let tx = advance(tx, TransactionStatus::Processing);
        assert!(tx.processed_at().is_some());
        assert!(tx.completed_at().is_none());

        let tx = advance(tx, TransactionStatus::Completed);
        assert!(tx.completed_at().is_some());
        assert_eq!(tx.gateway_ref(), Some("gw-1"));
        assert_eq!(tx.audit_trail().len(), 3);
        assert!(tx.verify_audit().is_valid);
    }

    #[test]
    fn test_illegal_transitions() {
        let tx = pending(Uuid::new_v4(), Uuid::new_v4());
        let result = tx.transition(
            TransactionStatus::Completed,
            Uuid::new_v4(),
            None,
            None,
            Utc::now(),
        );
        assert_eq!(
            result.unwrap_err(),
            DomainError::IllegalTransition {
                from: TransactionStatus::Pending,
                to: TransactionStatus::Completed,
            }
        );
        assert_eq!(tx.audit_trail().len(), 1);

        let cancelled = advance(tx, TransactionStatus::Cancelled);
        assert!(cancelled
            .transition(TransactionStatus::Processing, Uuid::new_v4(), None, None, Utc::now())
            .is_err());
    }

    #[test]
    fn test_balance_delta_only_when_completed() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let tx = pending(from, to);
        assert!(tx.balance_delta(to).is_zero());

        let tx = advance(advance(tx, TransactionStatus::Processing), TransactionStatus::Completed);
        assert_eq!(tx.balance_delta(to), usd(9_750));
        assert_eq!(tx.balance_delta(from), usd(-9_750));
        assert!(tx.balance_delta(Uuid::new_v4()).is_zero());

        let refunded = advance(tx, TransactionStatus::Refunded);
        assert!(refunded.balance_delta(to).is_zero());
    }

    #[test]
    fn test_replay_matches_and_detects_tampering() {
        let from = Uuid::new_v4();
        let new = NewTransaction::new(
            from,
            Uuid::new_v4(),
            TransactionType::Deposit,
            usd(500),
            PaymentMethod::Wallet,
        );
        let (tx, created) = Transaction::create(Uuid::new_v4(), new, from, Utc::now()).unwrap();
        let processing = tx
            .transition(TransactionStatus::Processing, from, None, None, Utc::now())
            .unwrap();

        let replayed = Transaction::default().apply_all(vec![created.clone(), processing.clone()]);
        assert!(replayed.verify_audit().is_valid);

        let tampered = match processing {
            TransactionEvent::TransactionStatusChanged {
                transaction_id,
                from,
                to,
                details: _,
                gateway_ref,
                changed_at,
                audit_hash,
                ..
            } => TransactionEvent::TransactionStatusChanged {
                transaction_id,
                from,
                to,
                actor: Uuid::new_v4(),
                details: None,
                gateway_ref,
                changed_at,
                audit_hash,
            },
            other => other,
        };
        let replayed = Transaction::default().apply_all(vec![created, tampered]);
        let result = replayed.verify_audit();
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(2));
    }
}
