//! Loan Aggregate
//!
//! Loan is the aggregate governing a loan's lifecycle. Command methods check
//! the lifecycle guards against current state and return the events to
//! persist; `apply` folds events into state. A rejected command returns an
//! error and no events, so a failed transition never leaves a timeline entry.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amortization::AmortizationCalculator;
use crate::domain::{
    Currency, DomainError, FundingContribution, Installment, InstallmentStatus, LoanCategory,
    LoanEvent, LoanPurpose, LoanStatus, LoanTerms, Money, Principal, TimelineEntry,
};

use super::Aggregate;

/// Actor recorded for transitions the system makes on its own
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Late-fee and default thresholds applied by `assess_overdue`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateFeePolicy {
    /// Late fee in basis points of the scheduled installment amount
    pub late_fee_bps: u32,
    /// Days after the due date before an installment counts as overdue
    pub grace_days: i64,
    /// Days overdue before an active loan defaults
    pub default_after_days: i64,
}

impl Default for LateFeePolicy {
    fn default() -> Self {
        Self {
            late_fee_bps: 500,
            grace_days: 0,
            default_after_days: 90,
        }
    }
}

/// Outcome of accepting a funding contribution
#[derive(Debug, Clone)]
pub struct ContributionDecision {
    pub events: Vec<LoanEvent>,
    pub new_funded_amount: Money,
    pub fully_funded: bool,
}

/// Figures derived from the terms and current funding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanFigures {
    pub monthly_payment: Money,
    pub total_interest: Money,
    pub total_payable: Money,
    pub remaining_amount: Money,
    pub funded_percentage: Decimal,
}

/// Loan Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    id: Uuid,
    borrower_id: Uuid,
    terms: LoanTerms,
    status: LoanStatus,
    /// Always the sum of `contributions`
    funded_amount: Money,
    contributions: Vec<FundingContribution>,
    schedule: Vec<Installment>,
    monthly_payment: Option<Money>,
    /// Interest over the materialized schedule
    total_interest: Option<Money>,
    timeline: Vec<TimelineEntry>,
    risk_score: Option<u8>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: i64,
}

impl Default for Loan {
    fn default() -> Self {
        let currency = Currency::default();
        Self {
            id: Uuid::nil(),
            borrower_id: Uuid::nil(),
            terms: LoanTerms {
                title: String::new(),
                description: String::new(),
                purpose: LoanPurpose::Other,
                amount: Money::zero(currency),
                interest_rate: Decimal::ZERO,
                tenure_months: 0,
                category: LoanCategory::Unsecured,
                collateral: None,
            },
            status: LoanStatus::Draft,
            funded_amount: Money::zero(currency),
            contributions: Vec::new(),
            schedule: Vec::new(),
            monthly_payment: None,
            total_interest: None,
            timeline: Vec::new(),
            risk_score: None,
            created_at: None,
            updated_at: None,
            version: 0,
        }
    }
}

impl Loan {
    // =========================================================================
    // Creation and draft editing
    // =========================================================================

    /// Create a draft loan and the creation event
    pub fn create(
        loan_id: Uuid,
        borrower_id: Uuid,
        terms: LoanTerms,
        now: DateTime<Utc>,
    ) -> (Self, LoanEvent) {
        let event = LoanEvent::LoanCreated {
            loan_id,
            borrower_id,
            terms,
            created_at: now,
        };
        let loan = Loan::default().apply(event.clone());
        (loan, event)
    }

    pub fn update_draft(
        &self,
        actor: Uuid,
        title: Option<String>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        self.ensure_borrower(actor)?;
        if self.status != LoanStatus::Draft {
            return Err(DomainError::illegal_state(self.status, "edit"));
        }
        Ok(LoanEvent::DraftUpdated {
            loan_id: self.id,
            title,
            description,
            updated_at: now,
        })
    }

    // =========================================================================
    // Lifecycle transitions
    // =========================================================================

    /// Generic guarded transition; the only producer of `StatusChanged`
    fn transition(
        &self,
        to: LoanStatus,
        action: &str,
        actor: Uuid,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        self.transition_from(self.status, to, action, actor, note, now)
    }

    fn transition_from(
        &self,
        from: LoanStatus,
        to: LoanStatus,
        action: &str,
        actor: Uuid,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        if !from.can_transition_to(to) {
            return Err(DomainError::illegal_state(from, action));
        }
        Ok(LoanEvent::StatusChanged {
            loan_id: self.id,
            from,
            to,
            actor,
            note: note.into(),
            changed_at: now,
        })
    }

    /// draft → pending, borrower only
    pub fn submit(&self, actor: Uuid, now: DateTime<Utc>) -> Result<LoanEvent, DomainError> {
        self.ensure_borrower(actor)?;
        self.transition(
            LoanStatus::Pending,
            "submit",
            actor,
            "Submitted for review",
            now,
        )
    }

    /// pending → approved, optionally recording a 1–10 risk score
    pub fn approve(
        &self,
        actor: Uuid,
        risk_score: Option<u8>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LoanEvent>, DomainError> {
        if self.status != LoanStatus::Pending {
            return Err(DomainError::illegal_state(self.status, "approve"));
        }
        if let Some(score) = risk_score {
            if !(1..=10).contains(&score) {
                return Err(DomainError::validation(
                    "risk_score",
                    "must be between 1 and 10",
                ));
            }
        }

        let note = note
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Approved".to_string());
        let mut events = vec![self.transition(LoanStatus::Approved, "approve", actor, note, now)?];
        if let Some(score) = risk_score {
            events.push(LoanEvent::RiskAssessed {
                loan_id: self.id,
                score,
                assessed_by: actor,
                assessed_at: now,
            });
        }
        Ok(events)
    }

    /// pending|approved → rejected with a mandatory reason
    pub fn reject(
        &self,
        actor: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        if !self.status.can_transition_to(LoanStatus::Rejected) {
            return Err(DomainError::illegal_state(self.status, "reject"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reason", "must not be empty"));
        }
        self.transition(LoanStatus::Rejected, "reject", actor, reason, now)
    }

    /// draft → cancelled, borrower only
    pub fn cancel_draft(&self, actor: Uuid, now: DateTime<Utc>) -> Result<LoanEvent, DomainError> {
        self.ensure_borrower(actor)?;
        self.transition(
            LoanStatus::Cancelled,
            "delete",
            actor,
            "Draft deleted by borrower",
            now,
        )
    }

    /// active → defaulted, administrative
    pub fn mark_defaulted(
        &self,
        actor: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        if !self.status.can_transition_to(LoanStatus::Defaulted) {
            return Err(DomainError::illegal_state(self.status, "default"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("reason", "must not be empty"));
        }
        self.transition(LoanStatus::Defaulted, "default", actor, reason, now)
    }

    // =========================================================================
    // Funding
    // =========================================================================

    /// Accept a contribution. On full funding the loan moves to `funded`,
    /// the schedule is materialized and the loan advances to `active`, all
    /// in the returned events.
    pub fn contribute(
        &self,
        lender_id: Uuid,
        amount: Money,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ContributionDecision, DomainError> {
        if !self.status.is_fundable() {
            return Err(DomainError::NotFundable {
                status: self.status,
            });
        }
        if lender_id == self.borrower_id {
            return Err(DomainError::Unauthorized(
                "borrowers cannot fund their own loan".to_string(),
            ));
        }
        let amount = amount.positive()?;
        if self.has_contributed(lender_id) {
            return Err(DomainError::DuplicateLender { lender: lender_id });
        }

        let remaining = self.remaining_amount()?;
        if amount.checked_cmp(&remaining)?.is_gt() {
            return Err(DomainError::OverfundingRejected {
                requested: amount,
                remaining,
            });
        }

        let new_funded_amount = self.funded_amount.checked_add(amount)?;
        let fully_funded = new_funded_amount == self.terms.amount;

        let mut events = vec![LoanEvent::FundingContributed {
            loan_id: self.id,
            lender_id,
            amount,
            transaction_id,
            contributed_at: now,
        }];

        if fully_funded {
            events.push(self.transition(
                LoanStatus::Funded,
                "fund",
                SYSTEM_ACTOR,
                "Fully funded",
                now,
            )?);

            let schedule = AmortizationCalculator::schedule(
                self.terms.amount,
                self.terms.interest_rate,
                self.terms.tenure_months,
                now.date_naive(),
            )?;
            events.push(LoanEvent::ScheduleMaterialized {
                loan_id: self.id,
                installments: schedule.installments,
                monthly_payment: schedule.monthly_payment,
                total_interest: schedule.total_interest,
                materialized_at: now,
            });

            events.push(self.transition_from(
                LoanStatus::Funded,
                LoanStatus::Active,
                "activate",
                SYSTEM_ACTOR,
                "Repayment schedule materialized",
                now,
            )?);
        }

        Ok(ContributionDecision {
            events,
            new_funded_amount,
            fully_funded,
        })
    }

    // =========================================================================
    // Repayment
    // =========================================================================

    /// Claim the oldest unpaid installment for a repayment transaction.
    /// The amount must equal what is due on it, late fee included.
    pub fn link_repayment(
        &self,
        actor: Uuid,
        installment_number: u32,
        amount: Money,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, DomainError> {
        self.ensure_borrower(actor)?;
        if self.status != LoanStatus::Active {
            return Err(DomainError::LoanNotActive {
                status: self.status,
            });
        }

        let oldest = self.oldest_unpaid().ok_or_else(|| {
            DomainError::validation("installment_number", "no unpaid installments")
        })?;
        if oldest.number != installment_number {
            return Err(DomainError::validation(
                "installment_number",
                format!("installment {} must be repaid first", oldest.number),
            ));
        }
        if oldest.transaction_id.is_some() {
            return Err(DomainError::validation(
                "installment_number",
                "a repayment for this installment is already in progress",
            ));
        }

        let due = oldest.amount_due()?;
        if amount != due {
            return Err(DomainError::validation(
                "amount",
                format!("must equal the amount due ({})", due),
            ));
        }

        Ok(LoanEvent::RepaymentLinked {
            loan_id: self.id,
            installment_number,
            transaction_id,
            linked_at: now,
        })
    }

    /// Free the installment claimed by a cancelled or failed repayment
    pub fn release_repayment(&self, transaction_id: Uuid, now: DateTime<Utc>) -> Option<LoanEvent> {
        self.schedule
            .iter()
            .find(|i| !i.is_paid() && i.transaction_id == Some(transaction_id))
            .map(|i| LoanEvent::RepaymentReleased {
                loan_id: self.id,
                installment_number: i.number,
                transaction_id,
                released_at: now,
            })
    }

    /// Mark the installment linked to `transaction_id` as paid. Completes the
    /// loan when it was the last unpaid installment of an active loan.
    pub fn record_installment_paid(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<LoanEvent>, DomainError> {
        if !matches!(self.status, LoanStatus::Active | LoanStatus::Defaulted) {
            return Err(DomainError::LoanNotActive {
                status: self.status,
            });
        }
        let installment = self
            .schedule
            .iter()
            .find(|i| !i.is_paid() && i.transaction_id == Some(transaction_id))
            .ok_or_else(|| {
                DomainError::validation(
                    "transaction_id",
                    "not linked to an unpaid installment of this loan",
                )
            })?;

        let mut events = vec![LoanEvent::InstallmentPaid {
            loan_id: self.id,
            installment_number: installment.number,
            transaction_id,
            paid_at: now,
        }];

        let others_paid = self
            .schedule
            .iter()
            .filter(|i| i.number != installment.number)
            .all(Installment::is_paid);
        if others_paid && self.status == LoanStatus::Active {
            events.push(self.transition(
                LoanStatus::Completed,
                "complete",
                SYSTEM_ACTOR,
                "All installments repaid",
                now,
            )?);
        }
        Ok(events)
    }

    // =========================================================================
    // Late fees
    // =========================================================================

    /// Mark installments overdue as of `as_of`, charging the late fee once,
    /// and default the loan when its oldest overdue installment is too old.
    /// Lateness runs from the due date alone: a repayment still in flight
    /// does not hold it off. If that repayment completes it still settles
    /// the installment.
    pub fn assess_overdue(
        &self,
        as_of: NaiveDate,
        policy: &LateFeePolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<LoanEvent>, DomainError> {
        if self.status != LoanStatus::Active {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let mut oldest_overdue: Option<NaiveDate> = None;

        for installment in self
            .schedule
            .iter()
            .filter(|i| !i.is_paid())
        {
            let days_late = (as_of - installment.due_date).num_days();
            if days_late <= policy.grace_days {
                continue;
            }
            if installment.status == InstallmentStatus::Pending {
                let late_fee = installment
                    .scheduled_amount()?
                    .apply_bps(policy.late_fee_bps)?;
                events.push(LoanEvent::InstallmentOverdue {
                    loan_id: self.id,
                    installment_number: installment.number,
                    late_fee,
                    marked_at: now,
                });
            }
            if oldest_overdue.is_none() {
                oldest_overdue = Some(installment.due_date);
            }
        }

        if let Some(due_date) = oldest_overdue {
            let days_overdue = (as_of - due_date).num_days();
            if days_overdue > policy.default_after_days {
                events.push(self.transition(
                    LoanStatus::Defaulted,
                    "default",
                    SYSTEM_ACTOR,
                    format!("Installment overdue for {} days", days_overdue),
                    now,
                )?);
            }
        }

        Ok(events)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn ensure_borrower(&self, actor: Uuid) -> Result<(), DomainError> {
        if actor != self.borrower_id {
            return Err(DomainError::NotBorrower);
        }
        Ok(())
    }

    pub fn has_contributed(&self, lender_id: Uuid) -> bool {
        self.contributions.iter().any(|c| c.lender_id == lender_id)
    }

    /// Borrower, contributing lenders and admins always see a loan; anyone
    /// may see it while it is open for funding
    pub fn is_visible_to(&self, principal: &Principal) -> bool {
        principal.is_admin()
            || principal.user_id == self.borrower_id
            || self.has_contributed(principal.user_id)
            || self.status.is_fundable()
    }

    pub fn remaining_amount(&self) -> Result<Money, DomainError> {
        Ok(self.terms.amount.checked_sub(self.funded_amount)?)
    }

    pub fn oldest_unpaid(&self) -> Option<&Installment> {
        self.schedule.iter().find(|i| !i.is_paid())
    }

    /// Payment totals. Once funded these come from the materialized
    /// schedule; before that from the schedule the current terms would yield.
    pub fn figures(&self) -> Result<LoanFigures, DomainError> {
        let (monthly_payment, total_interest) = match (self.monthly_payment, self.total_interest) {
            (Some(payment), Some(interest)) => (payment, interest),
            _ => {
                let anchor = self
                    .created_at
                    .map(|at| at.date_naive())
                    .unwrap_or_default();
                let projected = AmortizationCalculator::schedule(
                    self.terms.amount,
                    self.terms.interest_rate,
                    self.terms.tenure_months,
                    anchor,
                )?;
                (projected.monthly_payment, projected.total_interest)
            }
        };
        let total_payable = self.terms.amount.checked_add(total_interest)?;
        let funded_percentage = if self.terms.amount.is_zero() {
            Decimal::ZERO
        } else {
            (self.funded_amount.to_decimal() * Decimal::from(100) / self.terms.amount.to_decimal())
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        };

        Ok(LoanFigures {
            monthly_payment,
            total_interest,
            total_payable,
            remaining_amount: self.remaining_amount()?,
            funded_percentage,
        })
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn borrower_id(&self) -> Uuid {
        self.borrower_id
    }

    pub fn terms(&self) -> &LoanTerms {
        &self.terms
    }

    pub fn amount(&self) -> Money {
        self.terms.amount
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn funded_amount(&self) -> Money {
        self.funded_amount
    }

    pub fn contributions(&self) -> &[FundingContribution] {
        &self.contributions
    }

    pub fn schedule(&self) -> &[Installment] {
        &self.schedule
    }

    pub fn installment(&self, number: u32) -> Option<&Installment> {
        self.schedule.iter().find(|i| i.number == number)
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn risk_score(&self) -> Option<u8> {
        self.risk_score
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Aggregate for Loan {
    type Event = LoanEvent;

    fn aggregate_type() -> &'static str {
        "Loan"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            LoanEvent::LoanCreated {
                loan_id,
                borrower_id,
                terms,
                created_at,
            } => {
                self.id = loan_id;
                self.borrower_id = borrower_id;
                self.funded_amount = Money::zero(terms.amount.currency());
                self.terms = terms;
                self.status = LoanStatus::Draft;
                self.created_at = Some(created_at);
                self.updated_at = Some(created_at);
            }

            LoanEvent::DraftUpdated {
                title,
                description,
                updated_at,
                ..
            } => {
                if let Some(title) = title {
                    self.terms.title = title;
                }
                if let Some(description) = description {
                    self.terms.description = description;
                }
                self.updated_at = Some(updated_at);
            }

            LoanEvent::StatusChanged {
                from,
                to,
                actor,
                note,
                changed_at,
                ..
            } => {
                self.status = to;
                self.timeline.push(TimelineEntry {
                    from,
                    to,
                    actor,
                    note,
                    at: changed_at,
                });
                self.updated_at = Some(changed_at);
            }

            LoanEvent::RiskAssessed { score, .. } => {
                self.risk_score = Some(score);
            }

            LoanEvent::FundingContributed {
                lender_id,
                amount,
                transaction_id,
                contributed_at,
                ..
            } => {
                match self.funded_amount.checked_add(amount) {
                    Ok(total) => self.funded_amount = total,
                    Err(e) => {
                        tracing::error!(
                            loan_id = %self.id,
                            "Invalid contribution during replay: {}",
                            e
                        );
                    }
                }
                self.contributions.push(FundingContribution {
                    lender_id,
                    amount,
                    contributed_at,
                    transaction_id,
                });
                self.updated_at = Some(contributed_at);
            }

            LoanEvent::ScheduleMaterialized {
                installments,
                monthly_payment,
                total_interest,
                ..
            } => {
                self.schedule = installments;
                self.monthly_payment = Some(monthly_payment);
                self.total_interest = Some(total_interest);
            }

            LoanEvent::RepaymentLinked {
                installment_number,
                transaction_id,
                ..
            } => {
                if let Some(i) = self.installment_mut(installment_number) {
                    i.transaction_id = Some(transaction_id);
                }
            }

            LoanEvent::RepaymentReleased {
                installment_number, ..
            } => {
                if let Some(i) = self.installment_mut(installment_number) {
                    i.transaction_id = None;
                }
            }

            LoanEvent::InstallmentPaid {
                installment_number,
                transaction_id,
                paid_at,
                ..
            } => {
                if let Some(i) = self.installment_mut(installment_number) {
                    i.status = InstallmentStatus::Paid;
                    i.transaction_id = Some(transaction_id);
                    i.paid_at = Some(paid_at);
                }
                self.updated_at = Some(paid_at);
            }

            LoanEvent::InstallmentOverdue {
                installment_number,
                late_fee,
                ..
            } => {
                if let Some(i) = self.installment_mut(installment_number) {
                    i.status = InstallmentStatus::Overdue;
                    i.late_fee = late_fee;
                }
            }
        }

        self.version += 1;
        self
    }
}

impl Loan {
    fn installment_mut(&mut self, number: u32) -> Option<&mut Installment> {
        self.schedule.iter_mut().find(|i| i.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn usd(major: i64) -> Money {
        Money::from_major(major, Currency::Usd).unwrap()
    }

    fn terms(amount: i64, tenure_months: u32) -> LoanTerms {
        LoanTerms {
            title: "Kitchen renovation".to_string(),
            description: "New cabinets and countertops".to_string(),
            purpose: LoanPurpose::HomeImprovement,
            amount: usd(amount),
            interest_rate: dec!(6),
            tenure_months,
            category: LoanCategory::Unsecured,
            collateral: None,
        }
    }

    fn pending_loan(borrower: Uuid) -> Loan {
        let (loan, _) = Loan::create(Uuid::new_v4(), borrower, terms(10_000, 12), now());
        let event = loan.submit(borrower, now()).unwrap();
        loan.apply(event)
    }

    fn fund(loan: Loan, lender: Uuid, amount: i64) -> Loan {
        let decision = loan
            .contribute(lender, usd(amount), Uuid::new_v4(), now())
            .unwrap();
        loan.apply_all(decision.events)
    }

    fn active_loan(borrower: Uuid) -> Loan {
        let loan = pending_loan(borrower);
        let loan = fund(loan, Uuid::new_v4(), 6_000);
        fund(loan, Uuid::new_v4(), 4_000)
    }

    #[test]
    fn test_create_is_draft_without_timeline() {
        let borrower = Uuid::new_v4();
        let (loan, event) = Loan::create(Uuid::new_v4(), borrower, terms(10_000, 12), now());
        assert_eq!(loan.status(), LoanStatus::Draft);
        assert_eq!(loan.version(), 1);
        assert!(loan.timeline().is_empty());
        assert!(matches!(event, LoanEvent::LoanCreated { .. }));
    }

    #[test]
    fn test_only_borrower_submits() {
        let borrower = Uuid::new_v4();
        let (loan, _) = Loan::create(Uuid::new_v4(), borrower, terms(10_000, 12), now());
        assert!(matches!(
            loan.submit(Uuid::new_v4(), now()),
            Err(DomainError::NotBorrower)
        ));

        let loan = loan.clone().apply(loan.submit(borrower, now()).unwrap());
        assert_eq!(loan.status(), LoanStatus::Pending);
        assert_eq!(loan.timeline().len(), 1);
        assert_eq!(loan.timeline()[0].actor, borrower);
    }

    #[test]
    fn test_approve_draft_is_illegal() {
        let (loan, _) = Loan::create(Uuid::new_v4(), Uuid::new_v4(), terms(10_000, 12), now());
        let result = loan.approve(Uuid::new_v4(), None, None, now());
        assert!(matches!(
            result,
            Err(DomainError::IllegalLoanState {
                status: LoanStatus::Draft,
                ..
            })
        ));
        assert!(loan.timeline().is_empty());
    }

    #[test]
    fn test_approve_records_risk_score() {
        let loan = pending_loan(Uuid::new_v4());
        let events = loan.approve(Uuid::new_v4(), Some(4), None, now()).unwrap();
        let loan = loan.apply_all(events);
        assert_eq!(loan.status(), LoanStatus::Approved);
        assert_eq!(loan.risk_score(), Some(4));

        let pending = pending_loan(Uuid::new_v4());
        assert!(matches!(
            pending.approve(Uuid::new_v4(), Some(11), None, now()),
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_reject_requires_reason() {
        let loan = pending_loan(Uuid::new_v4());
        assert!(matches!(
            loan.reject(Uuid::new_v4(), "   ", now()),
            Err(DomainError::ValidationFailed(_))
        ));
        let loan = loan.clone().apply(loan.reject(Uuid::new_v4(), "Incomplete income proof", now()).unwrap());
        assert_eq!(loan.status(), LoanStatus::Rejected);
        assert_eq!(loan.timeline().last().unwrap().note, "Incomplete income proof");
    }

    #[test]
    fn test_full_funding_activates_with_schedule() {
        let borrower = Uuid::new_v4();
        let loan = pending_loan(borrower);

        let decision = loan.contribute(Uuid::new_v4(), usd(6_000), Uuid::new_v4(), now()).unwrap();
        assert!(!decision.fully_funded);
        assert_eq!(decision.new_funded_amount, usd(6_000));
        let loan = loan.apply_all(decision.events);

        let decision = loan.contribute(Uuid::new_v4(), usd(4_000), Uuid::new_v4(), now()).unwrap();
        assert!(decision.fully_funded);
        let loan = loan.apply_all(decision.events);

        assert_eq!(loan.status(), LoanStatus::Active);
        assert_eq!(loan.funded_amount(), usd(10_000));
        assert_eq!(loan.schedule().len(), 12);
        let statuses: Vec<_> = loan.timeline().iter().map(|t| t.to).collect();
        assert_eq!(
            statuses,
            vec![LoanStatus::Pending, LoanStatus::Funded, LoanStatus::Active]
        );
    }

    #[test]
    fn test_overfunding_rejected() {
        let loan = fund(pending_loan(Uuid::new_v4()), Uuid::new_v4(), 9_500);
        let result = loan.contribute(Uuid::new_v4(), usd(600), Uuid::new_v4(), now());
        assert_eq!(
            result.unwrap_err(),
            DomainError::OverfundingRejected {
                requested: usd(600),
                remaining: usd(500),
            }
        );
        assert_eq!(loan.funded_amount(), usd(9_500));
    }

    #[test]
    fn test_duplicate_lender_and_not_fundable() {
        let lender = Uuid::new_v4();
        let loan = fund(pending_loan(Uuid::new_v4()), lender, 1_000);
        assert_eq!(
            loan.contribute(lender, usd(100), Uuid::new_v4(), now()).unwrap_err(),
            DomainError::DuplicateLender { lender }
        );

        let (draft, _) = Loan::create(Uuid::new_v4(), Uuid::new_v4(), terms(10_000, 12), now());
        assert!(matches!(
            draft.contribute(lender, usd(100), Uuid::new_v4(), now()),
            Err(DomainError::NotFundable { .. })
        ));
    }

    #[test]
    fn test_borrower_cannot_fund_own_loan() {
        let borrower = Uuid::new_v4();
        let loan = pending_loan(borrower);
        assert!(matches!(
            loan.contribute(borrower, usd(100), Uuid::new_v4(), now()),
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_repayment_must_target_oldest_installment() {
        let borrower = Uuid::new_v4();
        let loan = active_loan(borrower);
        let due = loan.schedule()[0].amount_due().unwrap();

        assert!(matches!(
            loan.link_repayment(Uuid::new_v4(), 1, due, Uuid::new_v4(), now()),
            Err(DomainError::NotBorrower)
        ));
        assert!(matches!(
            loan.link_repayment(borrower, 2, due, Uuid::new_v4(), now()),
            Err(DomainError::ValidationFailed(_))
        ));
        assert!(matches!(
            loan.link_repayment(borrower, 1, usd(1), Uuid::new_v4(), now()),
            Err(DomainError::ValidationFailed(_))
        ));

        let tx = Uuid::new_v4();
        let loan = loan.clone().apply(loan.link_repayment(borrower, 1, due, tx, now()).unwrap());
        assert_eq!(loan.schedule()[0].transaction_id, Some(tx));
        assert!(matches!(
            loan.link_repayment(borrower, 1, due, Uuid::new_v4(), now()),
            Err(DomainError::ValidationFailed(_))
        ));

        let released = loan.release_repayment(tx, now()).unwrap();
        let loan = loan.apply(released);
        assert!(loan.schedule()[0].is_open());
    }

    #[test]
    fn test_repayment_on_pending_loan() {
        let borrower = Uuid::new_v4();
        let loan = pending_loan(borrower);
        assert!(matches!(
            loan.link_repayment(borrower, 1, usd(100), Uuid::new_v4(), now()),
            Err(DomainError::LoanNotActive {
                status: LoanStatus::Pending
            })
        ));
    }

    #[test]
    fn test_paying_every_installment_completes_loan() {
        let borrower = Uuid::new_v4();
        let mut loan = active_loan(borrower);

        for number in 1..=12 {
            let due = loan.installment(number).unwrap().amount_due().unwrap();
            let tx = Uuid::new_v4();
            let link = loan.link_repayment(borrower, number, due, tx, now()).unwrap();
            loan = loan.apply(link);
            let events = loan.record_installment_paid(tx, now()).unwrap();
            assert_eq!(events.len(), if number == 12 { 2 } else { 1 });
            loan = loan.apply_all(events);
        }

        assert_eq!(loan.status(), LoanStatus::Completed);
        assert!(loan.schedule().iter().all(Installment::is_paid));
    }

    #[test]
    fn test_overdue_installment_gets_one_late_fee() {
        let borrower = Uuid::new_v4();
        let loan = active_loan(borrower);
        let policy = LateFeePolicy::default();
        let first_due = loan.schedule()[0].due_date;

        let on_time = loan.assess_overdue(first_due, &policy, now()).unwrap();
        assert!(on_time.is_empty());

        let events = loan
            .assess_overdue(first_due + Duration::days(1), &policy, now())
            .unwrap();
        assert_eq!(events.len(), 1);
        let loan = loan.apply_all(events);

        let first = &loan.schedule()[0];
        assert_eq!(first.status, InstallmentStatus::Overdue);
        // 5% of 860.66
        assert_eq!(first.late_fee, Money::from_minor(4303, Currency::Usd));
        assert_eq!(first.amount_due().unwrap(), Money::from_minor(90369, Currency::Usd));

        let again = loan
            .assess_overdue(first_due + Duration::days(2), &policy, now())
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_long_overdue_loan_defaults() {
        let loan = active_loan(Uuid::new_v4());
        let policy = LateFeePolicy::default();
        let first_due = loan.schedule()[0].due_date;

        let events = loan
            .assess_overdue(first_due + Duration::days(91), &policy, now())
            .unwrap();
        let loan = loan.apply_all(events);
        assert_eq!(loan.status(), LoanStatus::Defaulted);
        assert_eq!(loan.schedule()[0].status, InstallmentStatus::Overdue);
    }

    #[test]
    fn test_repayment_in_flight_does_not_hold_off_default() {
        let borrower = Uuid::new_v4();
        let loan = active_loan(borrower);
        let policy = LateFeePolicy::default();
        let first_due = loan.schedule()[0].due_date;

        let tx = Uuid::new_v4();
        let linked = loan
            .link_repayment(borrower, 1, Money::from_minor(86066, Currency::Usd), tx, now())
            .unwrap();
        let loan = loan.apply(linked);
        assert_eq!(loan.schedule()[0].transaction_id, Some(tx));

        let events = loan
            .assess_overdue(first_due + Duration::days(91), &policy, now())
            .unwrap();
        let loan = loan.apply_all(events);
        assert_eq!(loan.status(), LoanStatus::Defaulted);
        assert_eq!(loan.schedule()[0].status, InstallmentStatus::Overdue);
        assert_eq!(loan.schedule()[0].late_fee, Money::from_minor(4303, Currency::Usd));

        // The pending repayment can still land
        let paid = loan.record_installment_paid(tx, now()).unwrap();
        let loan = loan.apply_all(paid);
        assert!(loan.schedule()[0].is_paid());
    }

    #[test]
    fn test_visibility() {
        let borrower = Uuid::new_v4();
        let lender = Uuid::new_v4();
        let stranger = Principal::new(Uuid::new_v4(), Role::Lender);

        let (draft, _) = Loan::create(Uuid::new_v4(), borrower, terms(10_000, 12), now());
        assert!(!draft.is_visible_to(&stranger));
        assert!(draft.is_visible_to(&Principal::new(borrower, Role::Borrower)));

        let pending = pending_loan(borrower);
        assert!(pending.is_visible_to(&stranger));

        let active = fund(fund(pending, lender, 5_000), Uuid::new_v4(), 5_000);
        assert!(!active.is_visible_to(&stranger));
        assert!(active.is_visible_to(&Principal::new(lender, Role::Lender)));
        assert!(active.is_visible_to(&Principal::new(Uuid::new_v4(), Role::Admin)));
    }

    #[test]
    fn test_figures() {
        let loan = fund(pending_loan(Uuid::new_v4()), Uuid::new_v4(), 2_500);
        let figures = loan.figures().unwrap();
        assert_eq!(figures.monthly_payment, Money::from_minor(86066, Currency::Usd));
        assert_eq!(figures.total_interest, Money::from_minor(32792, Currency::Usd));
        assert_eq!(figures.remaining_amount, usd(7_500));
        assert_eq!(figures.funded_percentage, dec!(25));
    }

    #[test]
    fn test_zero_rate_figures_cover_principal() {
        let borrower = Uuid::new_v4();
        let zero_rate = LoanTerms {
            interest_rate: Decimal::ZERO,
            ..terms(1_000, 3)
        };
        let (loan, _) = Loan::create(Uuid::new_v4(), borrower, zero_rate, now());
        let loan = loan.clone().apply(loan.submit(borrower, now()).unwrap());

        let projected = loan.figures().unwrap();
        assert_eq!(projected.monthly_payment, Money::from_minor(33_333, Currency::Usd));
        assert_eq!(projected.total_payable, usd(1_000));
        assert!(projected.total_interest.is_zero());

        let active = fund(loan, Uuid::new_v4(), 1_000);
        assert_eq!(active.status(), LoanStatus::Active);
        let figures = active.figures().unwrap();
        let scheduled: i64 = active
            .schedule()
            .iter()
            .map(|i| i.principal.minor() + i.interest.minor())
            .sum();
        assert_eq!(figures.total_payable.minor(), scheduled);
        assert_eq!(figures.total_payable, usd(1_000));
        assert!(figures.total_interest.is_zero());
    }
}
