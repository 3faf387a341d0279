//! Cached balances agree with a fold over the ledger

use std::collections::HashSet;

use rust_decimal_macros::dec;
use uuid::Uuid;

use loan_ledger::domain::{PaymentMethod, TransactionType};
use loan_ledger::handlers::{
    CompleteTransactionCommand, CreateTransactionCommand, CreateTransactionHandler,
    FundLoanCommand, FundLoanHandler, LoanQueryHandler, RecordRepaymentCommand,
    RecordRepaymentHandler, TransactionReasonCommand, TransactionStatusHandler,
};
use loan_ledger::idempotency::IdempotencyKey;
use loan_ledger::ledger::TransactionFilter;
use loan_ledger::projection::BalanceEngine;
use loan_ledger::{LedgerSettings, Role};

mod common;

use common::{approved_loan, ctx, principal, setup_state, terms};

#[tokio::test]
async fn test_cached_balances_match_recomputation() {
    let (state, _clock) = setup_state(LedgerSettings {
        processing_fee_bps: 150,
        ..LedgerSettings::default()
    });
    let borrower = principal(Role::Borrower);
    let admin = principal(Role::Admin);
    let lenders = [principal(Role::Lender), principal(Role::Lender)];
    let statuses = TransactionStatusHandler::new(state.clone());

    // Funding
    let loan_id =
        approved_loan(&state, borrower, admin, terms(dec!(3000), dec!(9), 6)).await;
    for (lender, amount) in lenders.iter().zip(["2000", "1000"]) {
        FundLoanHandler::new(state.clone())
            .execute(
                FundLoanCommand::new(loan_id, lender.user_id, amount.to_string()),
                &ctx(*lender),
            )
            .await
            .unwrap();
    }

    // Two repayments, one completed and one cancelled
    let loan = LoanQueryHandler::new(state.clone())
        .get(loan_id, &ctx(borrower))
        .await
        .unwrap();
    let due = loan.schedule[0].amount_due().unwrap().to_decimal().to_string();
    let repay = |key: &'static str| {
        let state = state.clone();
        let due = due.clone();
        async move {
            RecordRepaymentHandler::new(state)
                .execute(
                    RecordRepaymentCommand::new(loan_id, 1, due, PaymentMethod::BankTransfer),
                    Some(IdempotencyKey::parse(key).unwrap()),
                    &ctx(borrower),
                )
                .await
                .unwrap()
        }
    };
    let first = repay("first").await;
    assert!(!first.transaction.processing_fee.is_zero());
    statuses
        .cancel(
            TransactionReasonCommand::new(first.transaction.id, "Wrong account used".to_string()),
            &ctx(borrower),
        )
        .await
        .unwrap();
    let second = repay("second").await;
    statuses
        .complete(
            CompleteTransactionCommand::new(second.transaction.id, Some("bank-77".to_string())),
            &ctx(admin),
        )
        .await
        .unwrap();

    // A deposit that is later refunded and one that stays
    let outsider = Uuid::new_v4();
    for (key, refund) in [("dep-a", true), ("dep-b", false)] {
        let tx = CreateTransactionHandler::new(state.clone())
            .execute(
                CreateTransactionCommand::new(
                    outsider,
                    TransactionType::Deposit,
                    "75.25".to_string(),
                    PaymentMethod::Wallet,
                ),
                Some(IdempotencyKey::parse(key).unwrap()),
                &ctx(lenders[0]),
            )
            .await
            .unwrap();
        statuses
            .complete(CompleteTransactionCommand::new(tx.id, None), &ctx(lenders[0]))
            .await
            .unwrap();
        if refund {
            statuses
                .refund(
                    TransactionReasonCommand::new(tx.id, "Sent twice".to_string()),
                    &ctx(admin),
                )
                .await
                .unwrap();
        }
    }

    // Every party touched by the ledger
    let all = state
        .ledger()
        .list(&TransactionFilter::default())
        .await
        .unwrap();
    let parties: HashSet<Uuid> = all
        .iter()
        .flat_map(|tx| [tx.from_party(), tx.to_party()])
        .collect();
    assert!(parties.contains(&loan_id));

    let fresh = BalanceEngine::new(state.store.clone(), state.settings.currency);
    let mut total = 0i64;
    for party in parties {
        let cached = state.balances.balance(party).await.unwrap();
        assert_eq!(cached, state.balances.recompute(party).await.unwrap());
        assert_eq!(cached, fresh.balance(party).await.unwrap());
        total += cached.minor();
    }
    // Money only moves between parties
    assert_eq!(total, 0);
}
