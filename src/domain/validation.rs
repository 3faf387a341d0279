//! Loan terms validation
//!
//! Turns caller input into validated `LoanTerms`, reporting every failing
//! field at once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{DomainError, FieldViolation};
use super::money::{Currency, Money};
use super::types::{
    Collateral, CollateralKind, LoanCategory, LoanPurpose, LoanTerms, TenureUnit,
};

pub const TITLE_LEN: (usize, usize) = (5, 100);
pub const DESCRIPTION_LEN: (usize, usize) = (10, 1000);
pub const COLLATERAL_DESCRIPTION_LEN: (usize, usize) = (10, 500);
pub const MIN_LOAN_AMOUNT: i64 = 100;
pub const MAX_LOAN_AMOUNT: i64 = 1_000_000;
pub const MAX_INTEREST_RATE: i64 = 50;
pub const MAX_TENURE_MONTHS: u32 = 60;

/// Loan terms as submitted by a borrower
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanTermsInput {
    pub title: String,
    pub description: String,
    pub purpose: LoanPurpose,
    pub amount: Decimal,
    pub interest_rate: Decimal,
    pub tenure: u32,
    #[serde(default)]
    pub tenure_unit: TenureUnit,
    #[serde(default = "default_category")]
    pub category: LoanCategory,
    #[serde(default)]
    pub collateral: Option<CollateralInput>,
}

fn default_category() -> LoanCategory {
    LoanCategory::Unsecured
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralInput {
    pub kind: CollateralKind,
    pub description: String,
    pub value: Decimal,
}

/// Validate all loan fields, returning every violation found
pub fn validate_terms(input: &LoanTermsInput, currency: Currency) -> Result<LoanTerms, DomainError> {
    let mut violations = Vec::new();

    let title = input.title.trim().to_string();
    check_length("title", &title, TITLE_LEN, &mut violations);

    let description = input.description.trim().to_string();
    check_length("description", &description, DESCRIPTION_LEN, &mut violations);

    let amount = match Money::from_decimal(input.amount, currency) {
        Ok(amount) => {
            let min = Money::from_minor(MIN_LOAN_AMOUNT * 100, currency);
            let max = Money::from_minor(MAX_LOAN_AMOUNT * 100, currency);
            if amount < min || amount > max {
                violations.push(FieldViolation::new(
                    "amount",
                    format!("must be between {} and {}", MIN_LOAN_AMOUNT, MAX_LOAN_AMOUNT),
                ));
            }
            Some(amount)
        }
        Err(e) => {
            violations.push(FieldViolation::new("amount", e.to_string()));
            None
        }
    };

    if input.interest_rate < Decimal::ZERO || input.interest_rate > Decimal::from(MAX_INTEREST_RATE) {
        violations.push(FieldViolation::new(
            "interest_rate",
            format!("must be between 0 and {}", MAX_INTEREST_RATE),
        ));
    }

    let tenure_months = match input.tenure_unit {
        TenureUnit::Months => Some(input.tenure),
        TenureUnit::Years => input.tenure.checked_mul(12),
    };
    let tenure_months = match tenure_months {
        Some(months) if (1..=MAX_TENURE_MONTHS).contains(&months) => months,
        _ => {
            violations.push(FieldViolation::new(
                "tenure",
                format!("must be between 1 and {} months", MAX_TENURE_MONTHS),
            ));
            0
        }
    };

    let collateral = match (input.category, &input.collateral) {
        (LoanCategory::Secured, Some(collateral)) => {
            validate_collateral(collateral, currency, &mut violations)
        }
        (LoanCategory::Secured, None) => {
            violations.push(FieldViolation::new(
                "collateral",
                "is required for secured loans",
            ));
            None
        }
        (LoanCategory::Unsecured, Some(_)) => {
            violations.push(FieldViolation::new(
                "collateral",
                "is only allowed for secured loans",
            ));
            None
        }
        (LoanCategory::Unsecured, None) => None,
    };

    match amount {
        Some(amount) if violations.is_empty() => Ok(LoanTerms {
            title,
            description,
            purpose: input.purpose,
            amount,
            interest_rate: input.interest_rate,
            tenure_months,
            category: input.category,
            collateral,
        }),
        _ => Err(DomainError::ValidationFailed(violations)),
    }
}

fn validate_collateral(
    input: &CollateralInput,
    currency: Currency,
    violations: &mut Vec<FieldViolation>,
) -> Option<Collateral> {
    let description = input.description.trim().to_string();
    check_length(
        "collateral.description",
        &description,
        COLLATERAL_DESCRIPTION_LEN,
        violations,
    );

    match Money::from_decimal(input.value, currency) {
        Ok(value) if !value.is_negative() => Some(Collateral {
            kind: input.kind,
            description,
            value,
        }),
        Ok(_) => {
            violations.push(FieldViolation::new("collateral.value", "cannot be negative"));
            None
        }
        Err(e) => {
            violations.push(FieldViolation::new("collateral.value", e.to_string()));
            None
        }
    }
}

/// Validate the editable fields of a draft
pub fn validate_draft_update(
    title: Option<&str>,
    description: Option<&str>,
) -> Result<(Option<String>, Option<String>), DomainError> {
    let mut violations = Vec::new();

    let title = title.map(|t| t.trim().to_string());
    if let Some(title) = &title {
        check_length("title", title, TITLE_LEN, &mut violations);
    }
    let description = description.map(|d| d.trim().to_string());
    if let Some(description) = &description {
        check_length("description", description, DESCRIPTION_LEN, &mut violations);
    }
    if title.is_none() && description.is_none() {
        violations.push(FieldViolation::new("body", "nothing to update"));
    }

    if violations.is_empty() {
        Ok((title, description))
    } else {
        Err(DomainError::ValidationFailed(violations))
    }
}

fn check_length(
    field: &str,
    value: &str,
    (min, max): (usize, usize),
    violations: &mut Vec<FieldViolation>,
) {
    let len = value.chars().count();
    if len < min || len > max {
        violations.push(FieldViolation::new(
            field,
            format!("must be between {} and {} characters", min, max),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input() -> LoanTermsInput {
        LoanTermsInput {
            title: "Small business expansion".to_string(),
            description: "Second espresso machine for the cafe".to_string(),
            purpose: LoanPurpose::Business,
            amount: dec!(10000),
            interest_rate: dec!(6),
            tenure: 12,
            tenure_unit: TenureUnit::Months,
            category: LoanCategory::Unsecured,
            collateral: None,
        }
    }

    fn fields(err: DomainError) -> Vec<String> {
        match err {
            DomainError::ValidationFailed(v) => v.into_iter().map(|f| f.field).collect(),
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_terms() {
        let terms = validate_terms(&input(), Currency::Usd).unwrap();
        assert_eq!(terms.amount, Money::from_major(10_000, Currency::Usd).unwrap());
        assert_eq!(terms.tenure_months, 12);
        assert!(terms.collateral.is_none());
    }

    #[test]
    fn test_tenure_in_years() {
        let mut req = input();
        req.tenure = 2;
        req.tenure_unit = TenureUnit::Years;
        assert_eq!(validate_terms(&req, Currency::Usd).unwrap().tenure_months, 24);

        req.tenure = 6;
        assert_eq!(fields(validate_terms(&req, Currency::Usd).unwrap_err()), vec!["tenure"]);
    }

    #[test]
    fn test_reports_every_violation() {
        let mut req = input();
        req.title = "abc".to_string();
        req.amount = dec!(50);
        req.interest_rate = dec!(-1);
        let err = validate_terms(&req, Currency::Usd).unwrap_err();
        assert_eq!(fields(err), vec!["title", "amount", "interest_rate"]);
    }

    #[test]
    fn test_sub_cent_amount_rejected() {
        let mut req = input();
        req.amount = dec!(1000.001);
        assert_eq!(fields(validate_terms(&req, Currency::Usd).unwrap_err()), vec!["amount"]);
    }

    #[test]
    fn test_collateral_required_iff_secured() {
        let mut req = input();
        req.category = LoanCategory::Secured;
        assert_eq!(
            fields(validate_terms(&req, Currency::Usd).unwrap_err()),
            vec!["collateral"]
        );

        req.collateral = Some(CollateralInput {
            kind: CollateralKind::Vehicle,
            description: "2019 hatchback, 40k miles".to_string(),
            value: dec!(12000),
        });
        let terms = validate_terms(&req, Currency::Usd).unwrap();
        assert_eq!(terms.collateral.unwrap().kind, CollateralKind::Vehicle);

        let mut req = input();
        req.collateral = Some(CollateralInput {
            kind: CollateralKind::Jewelry,
            description: "Gold necklace and ring".to_string(),
            value: dec!(500),
        });
        assert_eq!(
            fields(validate_terms(&req, Currency::Usd).unwrap_err()),
            vec!["collateral"]
        );
    }

    #[test]
    fn test_draft_update() {
        let (title, description) =
            validate_draft_update(Some("  Updated title  "), None).unwrap();
        assert_eq!(title.as_deref(), Some("Updated title"));
        assert!(description.is_none());

        assert!(validate_draft_update(None, None).is_err());
        assert!(validate_draft_update(Some("x"), None).is_err());
    }
}
