//! Amortization
//!
//! Computes the level-payment repayment schedule of a fully funded loan.
//!
//! With monthly rate `i = r / 100 / 12` the payment is
//! `M = P·i·(1+i)^n / ((1+i)^n − 1)`, or `P / n` when `i = 0`. `M` is rounded
//! half away from zero to the minor unit. Each installment carries
//! `round(balance·i)` interest and `M − interest` principal. The last
//! installment repays the remaining balance, so the principal parts always
//! sum to `P` exactly and total interest is `M·n − P`. A zero-rate loan
//! splits `P` into near-equal parts instead and carries no interest.

use chrono::{Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, Installment, InstallmentStatus, Money};

const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// A materialized repayment schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentSchedule {
    pub installments: Vec<Installment>,
    pub monthly_payment: Money,
    pub total_interest: Money,
    pub total_payable: Money,
}

/// Pure, deterministic schedule computation
pub struct AmortizationCalculator;

impl AmortizationCalculator {
    /// Monthly rate as a fraction, e.g. `6` → `0.005`
    pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
        annual_rate_percent / Decimal::from(100) / Decimal::from(12)
    }

    /// Level monthly payment `M`, rounded to the minor unit
    pub fn monthly_payment(
        principal: Money,
        annual_rate_percent: Decimal,
        tenure_months: u32,
    ) -> Result<Money, DomainError> {
        validate_inputs(principal, annual_rate_percent, tenure_months)?;

        let i = Self::monthly_rate(annual_rate_percent);
        let p = principal.to_decimal();

        let payment = if i.is_zero() {
            p / Decimal::from(tenure_months)
        } else {
            let growth = compound(Decimal::ONE + i, tenure_months)?;
            let numerator = p
                .checked_mul(i)
                .and_then(|v| v.checked_mul(growth))
                .ok_or_else(overflow)?;
            numerator
                .checked_div(growth - Decimal::ONE)
                .ok_or_else(overflow)?
        };

        Ok(Money::from_decimal_rounded(payment, principal.currency(), ROUNDING)?)
    }

    /// Full schedule with `dueDate = anchor + k months` for `k = 1..=n`
    pub fn schedule(
        principal: Money,
        annual_rate_percent: Decimal,
        tenure_months: u32,
        anchor: NaiveDate,
    ) -> Result<RepaymentSchedule, DomainError> {
        let monthly_payment =
            Self::monthly_payment(principal, annual_rate_percent, tenure_months)?;
        let currency = principal.currency();
        let i = Self::monthly_rate(annual_rate_percent);

        let parts: Vec<(Money, Money)> = if i.is_zero() {
            principal
                .split(tenure_months)?
                .into_iter()
                .map(|p| (p, Money::zero(currency)))
                .collect()
        } else {
            let mut balance = principal;
            let mut parts = Vec::with_capacity(tenure_months as usize);
            for number in 1..=tenure_months {
                let (principal_part, interest_part) = if number < tenure_months {
                    let interest = balance.apply_rate(i, ROUNDING)?;
                    let principal_part = monthly_payment.checked_sub(interest)?;
                    // Only reachable for degenerate tiny loans
                    let principal_part = if principal_part > balance {
                        balance
                    } else {
                        principal_part
                    };
                    (principal_part, interest)
                } else {
                    let interest = monthly_payment.checked_sub(balance)?;
                    let interest = if interest.is_negative() {
                        Money::zero(currency)
                    } else {
                        interest
                    };
                    (balance, interest)
                };
                balance = balance.checked_sub(principal_part)?;
                parts.push((principal_part, interest_part));
            }
            parts
        };

        let mut installments = Vec::with_capacity(parts.len());
        for (idx, (principal_part, interest_part)) in parts.into_iter().enumerate() {
            let number = idx as u32 + 1;
            let due_date = anchor
                .checked_add_months(Months::new(number))
                .ok_or_else(|| DomainError::InvalidTerms("due date out of range".to_string()))?;
            installments.push(Installment {
                number,
                due_date,
                principal: principal_part,
                interest: interest_part,
                status: InstallmentStatus::Pending,
                late_fee: Money::zero(currency),
                transaction_id: None,
                paid_at: None,
            });
        }

        let total_interest = Money::sum(currency, installments.iter().map(|i| i.interest))?;
        let total_payable = principal.checked_add(total_interest)?;

        Ok(RepaymentSchedule {
            installments,
            monthly_payment,
            total_interest,
            total_payable,
        })
    }
}

fn validate_inputs(
    principal: Money,
    annual_rate_percent: Decimal,
    tenure_months: u32,
) -> Result<(), DomainError> {
    if !principal.is_positive() {
        return Err(DomainError::InvalidTerms(
            "principal must be positive".to_string(),
        ));
    }
    if tenure_months == 0 {
        return Err(DomainError::InvalidTerms(
            "tenure must be at least one month".to_string(),
        ));
    }
    if annual_rate_percent.is_sign_negative() && !annual_rate_percent.is_zero() {
        return Err(DomainError::InvalidTerms(
            "interest rate cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// `base^n` by repeated multiplication
fn compound(base: Decimal, n: u32) -> Result<Decimal, DomainError> {
    (0..n).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(base).ok_or_else(overflow))
}

fn overflow() -> DomainError {
    DomainError::InvalidTerms("payment computation overflowed".to_string())
}
