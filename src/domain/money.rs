//! Money type
//!
//! Domain primitive for monetary amounts. Values are stored as integer minor
//! units (cents) together with a currency code, so arithmetic is exact.
//! Every operation that could lose precision either takes an explicit
//! rounding strategy or fails.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Number of decimal places held by every supported currency
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Supported settlement currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::Usd
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "CAD" => Ok(Currency::Cad),
            "AUD" => Ok(Currency::Aud),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors raised by monetary arithmetic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(String),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Amount {0} has more than {MINOR_UNIT_SCALE} decimal places")]
    PrecisionLoss(Decimal),

    #[error("Amount overflow")]
    Overflow,

    #[error("Cannot split amount: {0}")]
    InvalidSplit(String),

    #[error("Invalid amount format: {0}")]
    ParseError(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

/// A monetary amount in minor units of a single currency.
///
/// # Invariants
/// - Arithmetic between two amounts requires the same currency
/// - No operation rounds unless a rounding strategy is passed in
///
/// # Example
/// ```
/// use loan_ledger::domain::{Currency, Money};
///
/// let amount = Money::from_major(100, Currency::Usd).unwrap();
/// let parts = amount.split(3).unwrap();
/// assert_eq!(parts[0].minor(), 3334);
/// assert_eq!(parts[2].minor(), 3333);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    minor: i64,
    currency: Currency,
}

/// Wire form: the amount as a decimal string plus the currency code
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoneyRepr {
    amount: String,
    currency: Currency,
}

impl Money {
    /// Zero in the given currency
    pub const fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Create from minor units (cents)
    pub const fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Create from whole currency units
    pub fn from_major(major: i64, currency: Currency) -> Result<Self, MoneyError> {
        let minor = major
            .checked_mul(10_i64.pow(MINOR_UNIT_SCALE))
            .ok_or(MoneyError::Overflow)?;
        Ok(Self { minor, currency })
    }

    /// Create from a decimal value. Fails instead of rounding when the value
    /// carries more precision than the minor unit.
    pub fn from_decimal(value: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if value.normalize().scale() > MINOR_UNIT_SCALE {
            return Err(MoneyError::PrecisionLoss(value));
        }
        let minor = (value * Decimal::from(10_i64.pow(MINOR_UNIT_SCALE)))
            .to_i64()
            .ok_or(MoneyError::Overflow)?;
        Ok(Self { minor, currency })
    }

    /// Create from a decimal value, rounding to the minor unit with the given strategy
    pub fn from_decimal_rounded(
        value: Decimal,
        currency: Currency,
        strategy: RoundingStrategy,
    ) -> Result<Self, MoneyError> {
        Self::from_decimal(
            value.round_dp_with_strategy(MINOR_UNIT_SCALE, strategy),
            currency,
        )
    }

    /// Parse a decimal string such as `"1250.50"`
    pub fn parse(s: &str, currency: Currency) -> Result<Self, MoneyError> {
        let value =
            Decimal::from_str(s.trim()).map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Self::from_decimal(value, currency)
    }

    /// Require the amount to be at least one minor unit
    pub fn positive(self) -> Result<Self, MoneyError> {
        if self.minor <= 0 {
            return Err(MoneyError::NotPositive(self.to_string()));
        }
        Ok(self)
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// The amount as a decimal in major units
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, MINOR_UNIT_SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let minor = self.minor.checked_add(other.minor).ok_or(MoneyError::Overflow)?;
        Ok(Money { minor, ..self })
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let minor = self.minor.checked_sub(other.minor).ok_or(MoneyError::Overflow)?;
        Ok(Money { minor, ..self })
    }

    pub fn checked_neg(self) -> Result<Money, MoneyError> {
        let minor = self.minor.checked_neg().ok_or(MoneyError::Overflow)?;
        Ok(Money { minor, ..self })
    }

    /// Compare two amounts of the same currency
    pub fn checked_cmp(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }

    /// Multiply by a rate (e.g. `0.00708` for a monthly rate), rounding the
    /// product to the minor unit with the given strategy
    pub fn apply_rate(self, rate: Decimal, strategy: RoundingStrategy) -> Result<Money, MoneyError> {
        let product = self
            .to_decimal()
            .checked_mul(rate)
            .ok_or(MoneyError::Overflow)?;
        Self::from_decimal_rounded(product, self.currency, strategy)
    }

    /// Basis-point share of the amount, rounded half away from zero
    pub fn apply_bps(self, bps: u32) -> Result<Money, MoneyError> {
        self.apply_rate(
            Decimal::new(i64::from(bps), 4),
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Divide into `parts` amounts that differ by at most one minor unit and
    /// sum exactly to `self`. Larger parts come first.
    pub fn split(self, parts: u32) -> Result<Vec<Money>, MoneyError> {
        if parts == 0 {
            return Err(MoneyError::InvalidSplit("zero parts".to_string()));
        }
        if self.minor < 0 {
            return Err(MoneyError::InvalidSplit("negative amount".to_string()));
        }
        let n = i64::from(parts);
        let base = self.minor / n;
        let remainder = self.minor % n;

        Ok((0..n)
            .map(|idx| Money {
                minor: if idx < remainder { base + 1 } else { base },
                ..self
            })
            .collect())
    }

    /// Allocate the amount proportionally to `weights` using the largest
    /// remainder method. The result sums exactly to `self`; ties go to the
    /// earlier weight.
    pub fn allocate(self, weights: &[i64]) -> Result<Vec<Money>, MoneyError> {
        if self.minor < 0 {
            return Err(MoneyError::InvalidSplit("negative amount".to_string()));
        }
        if weights.iter().any(|w| *w < 0) {
            return Err(MoneyError::InvalidSplit("negative weight".to_string()));
        }
        let total: i128 = weights.iter().map(|w| i128::from(*w)).sum();
        if total == 0 {
            return Err(MoneyError::InvalidSplit("weights sum to zero".to_string()));
        }

        let amount = i128::from(self.minor);
        let mut shares = Vec::with_capacity(weights.len());
        let mut remainders = Vec::with_capacity(weights.len());
        for (idx, weight) in weights.iter().enumerate() {
            let numerator = amount * i128::from(*weight);
            shares.push(numerator / total);
            remainders.push((idx, numerator % total));
        }

        let mut leftover = amount - shares.iter().sum::<i128>();
        remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (idx, _) in remainders {
            if leftover == 0 {
                break;
            }
            shares[idx] += 1;
            leftover -= 1;
        }

        shares
            .into_iter()
            .map(|minor| {
                let minor = i64::try_from(minor).map_err(|_| MoneyError::Overflow)?;
                Ok(Money { minor, ..self })
            })
            .collect()
    }

    /// Sum amounts of one currency
    pub fn sum<I>(currency: Currency, amounts: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }
}

impl PartialOrd for Money {
    /// Amounts in different currencies are unordered
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.checked_cmp(other).ok()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.to_decimal())
    }
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::parse(&repr.amount, repr.currency)
    }
}

impl From<Money> for MoneyRepr {
    fn from(money: Money) -> Self {
        MoneyRepr {
            amount: money.to_decimal().to_string(),
            currency: money.currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Usd)
    }

    #[test]
    fn test_from_decimal_exact() {
        let m = Money::from_decimal(dec!(1250.50), Currency::Usd).unwrap();
        assert_eq!(m.minor(), 125050);
        assert_eq!(m.to_decimal(), dec!(1250.50));
    }

    #[test]
    fn test_from_decimal_rejects_sub_cent() {
        let result = Money::from_decimal(dec!(10.005), Currency::Usd);
        assert!(matches!(result, Err(MoneyError::PrecisionLoss(_))));
    }

    #[test]
    fn test_trailing_zeros_are_not_precision() {
        let m = Money::from_decimal(dec!(10.5000), Currency::Usd).unwrap();
        assert_eq!(m.minor(), 1050);
    }

    #[test]
    fn test_positive() {
        assert!(usd(1).positive().is_ok());
        assert!(matches!(usd(0).positive(), Err(MoneyError::NotPositive(_))));
        assert!(matches!(usd(-5).positive(), Err(MoneyError::NotPositive(_))));
    }

    #[test]
    fn test_currency_mismatch() {
        let eur = Money::from_minor(100, Currency::Eur);
        let result = usd(100).checked_add(eur);
        assert!(matches!(result, Err(MoneyError::CurrencyMismatch { .. })));
        assert_eq!(usd(100).partial_cmp(&eur), None);
    }

    #[test]
    fn test_add_sub() {
        assert_eq!(usd(150).checked_add(usd(50)).unwrap(), usd(200));
        assert_eq!(usd(150).checked_sub(usd(200)).unwrap(), usd(-50));
        assert!(matches!(
            usd(i64::MAX).checked_add(usd(1)),
            Err(MoneyError::Overflow)
        ));
    }

    #[test]
    fn test_apply_rate_rounds_explicitly() {
        // 25000.00 * 0.085 / 12 = 177.0833..
        let interest = Money::from_major(25_000, Currency::Usd)
            .unwrap()
            .apply_rate(dec!(0.085) / dec!(12), RoundingStrategy::MidpointAwayFromZero)
            .unwrap();
        assert_eq!(interest, usd(17708));
    }

    #[test]
    fn test_apply_bps() {
        assert_eq!(usd(86066).apply_bps(500).unwrap(), usd(4303));
        assert_eq!(usd(10000).apply_bps(0).unwrap(), usd(0));
    }

    #[test]
    fn test_split_sums_exactly() {
        let parts = usd(1000).split(3).unwrap();
        assert_eq!(parts, vec![usd(334), usd(333), usd(333)]);
        assert_eq!(Money::sum(Currency::Usd, parts).unwrap(), usd(1000));
        assert!(usd(1000).split(0).is_err());
    }

    #[test]
    fn test_allocate_pro_rata() {
        // 60/40 split of 100.01
        let shares = usd(10001).allocate(&[6000, 4000]).unwrap();
        assert_eq!(shares, vec![usd(6001), usd(4000)]);

        let shares = usd(100).allocate(&[1, 1, 1]).unwrap();
        assert_eq!(shares, vec![usd(34), usd(33), usd(33)]);

        assert!(usd(100).allocate(&[0, 0]).is_err());
    }

    #[test]
    fn test_serde_as_decimal_string() {
        let json = serde_json::to_string(&usd(123456)).unwrap();
        assert_eq!(json, r#"{"amount":"1234.56","currency":"USD"}"#);

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, usd(123456));

        let bad = serde_json::from_str::<Money>(r#"{"amount":"1.001","currency":"USD"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(usd(500).to_string(), "USD 5.00");
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
    }
}
