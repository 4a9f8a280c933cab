use crate::error::{AppError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places every monetary amount is carried at.
pub const AMOUNT_SCALE: u32 = 6;

/// A positive monetary amount, normalized to [`AMOUNT_SCALE`] decimal places
/// with half-away-from-zero rounding.
///
/// Construction through [`Money::new`] rejects non-positive input, so a
/// `Money` held by an aggregate is always a real amount; only the additive
/// identity [`Money::zero`] sits at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Creates an amount, rejecting anything that is not strictly positive
    /// after normalization.
    pub fn new(value: Decimal) -> Result<Self> {
        let normalized = Self::normalize(value);
        if normalized <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Amount must be positive, got {}",
                value
            )));
        }
        Ok(Self(normalized))
    }

    /// The additive identity, used for freshly opened ledger totals.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn add(self, other: Money) -> Money {
        Money(Self::normalize(self.0 + other.0))
    }

    /// Subtracts `other`, failing instead of going negative.
    pub fn subtract(self, other: Money) -> Result<Money> {
        let difference = Self::normalize(self.0 - other.0);
        if difference < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Cannot subtract {} from {}",
                other, self
            )));
        }
        Ok(Money(difference))
    }

    /// Subtracts `other`, clamping at zero instead of going negative.
    pub fn saturating_subtract(self, other: Money) -> Money {
        if other.0 >= self.0 {
            Money::zero()
        } else {
            Money(Self::normalize(self.0 - other.0))
        }
    }

    fn normalize(value: Decimal) -> Decimal {
        value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_requires_positive_amount() {
        assert!(Money::new(dec!(0.01)).is_ok());
        assert!(matches!(
            Money::new(Decimal::ZERO),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            Money::new(dec!(-5)),
            Err(AppError::Validation(_))
        ));
        // Rounds to zero at six decimal places, so it is not a real amount.
        assert!(Money::new(dec!(0.0000001)).is_err());
    }

    #[test]
    fn test_construction_rounds_half_away_from_zero() {
        let m = Money::new(dec!(1.0000005)).unwrap();
        assert_eq!(m.amount(), dec!(1.000001));

        let down = Money::new(dec!(1.0000004)).unwrap();
        assert_eq!(down.amount(), dec!(1));
    }

    #[test]
    fn test_add_normalizes_result() {
        let a = Money::new(dec!(0.333333)).unwrap();
        let b = Money::new(dec!(0.333334)).unwrap();
        assert_eq!(a.add(b).amount(), dec!(0.666667));
    }

    #[test]
    fn test_subtract_rejects_negative_result() {
        let a = Money::new(dec!(10)).unwrap();
        let b = Money::new(dec!(30)).unwrap();
        assert_eq!(a.subtract(a).unwrap(), Money::zero());
        assert_eq!(b.subtract(a).unwrap(), Money::new(dec!(20)).unwrap());
        assert!(matches!(a.subtract(b), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_saturating_subtract_clamps_at_zero() {
        let a = Money::new(dec!(10)).unwrap();
        let b = Money::new(dec!(30)).unwrap();
        assert_eq!(b.saturating_subtract(a), Money::new(dec!(20)).unwrap());
        assert!(a.saturating_subtract(b).is_zero());
        assert!(a.saturating_subtract(a).is_zero());
    }

    #[test]
    fn test_comparison_ignores_written_scale() {
        let short = Money::new(dec!(1.5)).unwrap();
        let long = Money::new(dec!(1.50)).unwrap();
        assert_eq!(short, long);
        assert!(Money::new(dec!(2)).unwrap() > long);
        assert!(Money::zero() < short);
    }

    #[test]
    fn test_serde_is_transparent() {
        let m = Money::new(dec!(42.5)).unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"42.5\"");

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_display() {
        let m = Money::new(dec!(99.99)).unwrap();
        assert_eq!(m.to_string(), "99.99");
    }
}
