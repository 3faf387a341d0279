//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use loan_ledger::domain::{
    LoanCategory, LoanPurpose, LoanTermsInput, ManualClock, TenureUnit,
};
use loan_ledger::event_store::MemoryEventStore;
use loan_ledger::gateway::SimulatedGateway;
use loan_ledger::handlers::{
    ApproveLoanCommand, CreateLoanCommand, CreateLoanHandler, LoanLifecycleHandler,
};
use loan_ledger::{AppState, LedgerSettings, OperationContext, Principal, Role};

/// In-memory ledger on a manual clock starting 2026-01-15 09:00 UTC
pub fn setup_state(settings: LedgerSettings) -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    ));
    let state = AppState::new(
        Arc::new(MemoryEventStore::new()),
        Arc::new(SimulatedGateway),
        clock.clone(),
        settings,
    );
    (state, clock)
}

pub fn principal(role: Role) -> Principal {
    Principal::new(Uuid::new_v4(), role)
}

pub fn ctx(principal: Principal) -> OperationContext {
    OperationContext::new()
        .with_principal(principal)
        .with_correlation_id(Uuid::new_v4())
}

pub fn terms(amount: Decimal, rate: Decimal, months: u32) -> LoanTermsInput {
    LoanTermsInput {
        title: "Delivery van".to_string(),
        description: "Second-hand van for a catering business".to_string(),
        purpose: LoanPurpose::Business,
        amount,
        interest_rate: rate,
        tenure: months,
        tenure_unit: TenureUnit::Months,
        category: LoanCategory::Unsecured,
        collateral: None,
    }
}

/// Create, submit and approve a loan; returns its id
pub async fn approved_loan(
    state: &AppState,
    borrower: Principal,
    admin: Principal,
    terms: LoanTermsInput,
) -> Uuid {
    let loan = CreateLoanHandler::new(state.clone())
        .execute(CreateLoanCommand::new(terms), &ctx(borrower))
        .await
        .unwrap();
    let lifecycle = LoanLifecycleHandler::new(state.clone());
    lifecycle.submit(loan.id, &ctx(borrower)).await.unwrap();
    lifecycle
        .approve(ApproveLoanCommand::new(loan.id), &ctx(admin))
        .await
        .unwrap();
    loan.id
}
