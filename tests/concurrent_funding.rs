//! Concurrent funding and repayment against one loan

use std::collections::HashSet;

use rust_decimal_macros::dec;
use uuid::Uuid;

use loan_ledger::domain::{LoanStatus, Money, PaymentMethod, TransactionType};
use loan_ledger::handlers::{
    FundLoanCommand, FundLoanHandler, LoanQueryHandler, RecordRepaymentCommand,
    RecordRepaymentHandler,
};
use loan_ledger::idempotency::IdempotencyKey;
use loan_ledger::ledger::TransactionFilter;
use loan_ledger::{Currency, DomainError, LedgerSettings, Role};

mod common;

use common::{approved_loan, ctx, principal, setup_state, terms};

fn settings() -> LedgerSettings {
    LedgerSettings {
        conflict_max_retries: 200,
        ..LedgerSettings::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_funding_never_exceeds_amount() {
    let (state, _clock) = setup_state(settings());
    let borrower = principal(Role::Borrower);
    let admin = principal(Role::Admin);
    let loan_id = approved_loan(&state, borrower, admin, terms(dec!(20000), dec!(7), 12)).await;

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let lender = principal(Role::Lender);
            FundLoanHandler::new(state)
                .execute(
                    FundLoanCommand::new(loan_id, lender.user_id, "1000".to_string()),
                    &ctx(lender),
                )
                .await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => {
                assert!(
                    matches!(e.domain(), Some(DomainError::NotFundable { .. })),
                    "unexpected error: {}",
                    e
                );
                rejected += 1;
            }
        }
    }
    assert_eq!(accepted, 20);
    assert_eq!(rejected, 30);

    let loan = LoanQueryHandler::new(state.clone())
        .get(loan_id, &ctx(admin))
        .await
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.funded_amount, Money::from_minor(2_000_000, Currency::Usd));
    let lenders: HashSet<Uuid> = loan.contributions.iter().map(|c| c.lender_id).collect();
    assert_eq!(lenders.len(), 20);

    let funding = state
        .ledger()
        .list(&TransactionFilter {
            loan_id: Some(loan_id),
            transaction_type: Some(TransactionType::LoanFunding),
            ..TransactionFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(funding.len(), 20);
    assert_eq!(
        state.balances.balance(borrower.user_id).await.unwrap(),
        Money::from_minor(2_000_000, Currency::Usd)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_with_one_key_record_one_repayment() {
    let (state, _clock) = setup_state(settings());
    let borrower = principal(Role::Borrower);
    let admin = principal(Role::Admin);
    let lender = principal(Role::Lender);
    let loan_id = approved_loan(&state, borrower, admin, terms(dec!(1000), dec!(12), 3)).await;
    FundLoanHandler::new(state.clone())
        .execute(
            FundLoanCommand::new(loan_id, lender.user_id, "1000".to_string()),
            &ctx(lender),
        )
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            RecordRepaymentHandler::new(state)
                .execute(
                    RecordRepaymentCommand::new(
                        loan_id,
                        1,
                        "340.02".to_string(),
                        PaymentMethod::DebitCard,
                    ),
                    Some(IdempotencyKey::parse("installment-1").unwrap()),
                    &ctx(borrower),
                )
                .await
        }));
    }

    let mut ids = HashSet::new();
    let mut fresh = 0;
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        ids.insert(result.transaction.id);
        if !result.replayed {
            fresh += 1;
        }
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(fresh, 1);

    let repayments = state
        .ledger()
        .list(&TransactionFilter {
            loan_id: Some(loan_id),
            transaction_type: Some(TransactionType::LoanRepayment),
            ..TransactionFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(repayments.len(), 1);
}
