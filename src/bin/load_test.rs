//! Funding Load Test
//!
//! Many lenders race to fund one loan against the in-memory ledger core.
//! Reports accepted and rejected contributions and checks the funding cap.
//!
//! Run with: cargo run --bin load_test --release -- --lenders 500 --amount 100000

use std::time::Instant;

use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use loan_ledger::domain::{LoanCategory, LoanPurpose, LoanTermsInput, TenureUnit};
use loan_ledger::handlers::{
    ApproveLoanCommand, CreateLoanCommand, CreateLoanHandler, FundLoanCommand, FundLoanHandler,
    LoanLifecycleHandler, LoanQueryHandler,
};
use loan_ledger::{AppState, DomainError, LedgerSettings, OperationContext, Principal, Role};

fn arg<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> T {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let lenders: usize = arg(&args, "--lenders", 500);
    let loan_amount: u32 = arg(&args, "--amount", 100_000);

    let state = AppState::in_memory(LedgerSettings {
        conflict_max_retries: 50,
        ..LedgerSettings::default()
    });

    let borrower = Principal::new(Uuid::new_v4(), Role::Borrower);
    let admin = OperationContext::new().with_principal(Principal::new(Uuid::new_v4(), Role::Admin));
    let borrower_ctx = OperationContext::new().with_principal(borrower);

    let loan = CreateLoanHandler::new(state.clone())
        .execute(
            CreateLoanCommand::new(LoanTermsInput {
                title: "Load test loan".to_string(),
                description: "Loan funded concurrently by many lenders".to_string(),
                purpose: LoanPurpose::Business,
                amount: Decimal::from(loan_amount),
                interest_rate: Decimal::from(8),
                tenure: 24,
                tenure_unit: TenureUnit::Months,
                category: LoanCategory::Unsecured,
                collateral: None,
            }),
            &borrower_ctx,
        )
        .await?;
    let lifecycle = LoanLifecycleHandler::new(state.clone());
    lifecycle.submit(loan.id, &borrower_ctx).await?;
    lifecycle
        .approve(ApproveLoanCommand::new(loan.id), &admin)
        .await?;

    println!(
        "Load Test - {} lenders funding a loan of {}",
        lenders, loan_amount
    );

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(lenders);
    for _ in 0..lenders {
        let state = state.clone();
        let loan_id = loan.id;
        let amount: u32 = rand::thread_rng().gen_range(100..=2_000);
        tasks.push(tokio::spawn(async move {
            let lender = Principal::new(Uuid::new_v4(), Role::Lender);
            FundLoanHandler::new(state)
                .execute(
                    FundLoanCommand::new(loan_id, lender.user_id, amount.to_string()),
                    &OperationContext::new().with_principal(lender),
                )
                .await
        }));
    }

    let (mut accepted, mut overfunding, mut closed, mut other) = (0u64, 0u64, 0u64, 0u64);
    for task in tasks {
        match task.await? {
            Ok(_) => accepted += 1,
            Err(e) => match e.domain() {
                Some(DomainError::OverfundingRejected { .. }) => overfunding += 1,
                Some(DomainError::NotFundable { .. }) => closed += 1,
                _ => {
                    other += 1;
                    eprintln!("Unexpected error: {}", e);
                }
            },
        }
    }
    let elapsed = start.elapsed();

    let view = LoanQueryHandler::new(state.clone()).get(loan.id, &admin).await?;
    let contributed = view
        .contributions
        .iter()
        .try_fold(Decimal::ZERO, |sum, c| sum.checked_add(c.amount.to_decimal()))
        .ok_or_else(|| anyhow::anyhow!("contribution total overflowed"))?;

    println!("\n=== Load Test Results ===");
    println!("Accepted: {}", accepted);
    println!("Rejected (overfunding): {}", overfunding);
    println!("Rejected (not fundable): {}", closed);
    println!("Failed: {}", other);
    println!("Funded: {} of {} ({})", view.funded_amount, view.amount, view.status);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!(
        "Rate: {:.0} contributions/sec",
        lenders as f64 / elapsed.as_secs_f64()
    );

    if view.funded_amount.to_decimal() > view.amount.to_decimal() {
        anyhow::bail!("funding cap exceeded");
    }
    if contributed != view.funded_amount.to_decimal() || view.contributions.len() as u64 != accepted
    {
        anyhow::bail!("contributions do not add up to the funded amount");
    }
    println!("Funding cap held");

    Ok(())
}
