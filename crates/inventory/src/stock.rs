use serde::{Deserialize, Serialize};

use stockguard_core::{DomainError, DomainResult, ValueObject};

/// Non-negative stock quantity.
///
/// Every operation returns a new value; invalid operations fail instead of
/// clamping.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct StockCount(i64);

impl ValueObject for StockCount {}

impl StockCount {
    pub const ZERO: StockCount = StockCount(0);

    /// Fails with `InvalidStock` for negative quantities.
    pub fn new(quantity: i64) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::InvalidStock(quantity));
        }
        Ok(Self(quantity))
    }

    pub fn quantity(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn has_enough(&self, amount: i64) -> bool {
        self.0 >= amount
    }

    pub fn deduct(&self, amount: i64) -> DomainResult<Self> {
        validate_quantity(amount)?;
        if !self.has_enough(amount) {
            return Err(DomainError::insufficient(amount, self.0));
        }
        Ok(Self(self.0 - amount))
    }

    /// No upper bound beyond the representable range.
    pub fn restore(&self, amount: i64) -> DomainResult<Self> {
        validate_quantity(amount)?;
        self.0
            .checked_add(amount)
            .map(Self)
            .ok_or_else(|| DomainError::invalid_argument(format!("restoring {amount} overflows stock {}", self.0)))
    }

    pub fn add(&self, amount: i64) -> DomainResult<Self> {
        self.restore(amount)
    }
}

/// A deduction or restoration amount must be strictly positive.
pub fn validate_quantity(amount: i64) -> DomainResult<()> {
    if amount <= 0 {
        return Err(DomainError::invalid_argument(format!(
            "quantity must be positive, got {amount}"
        )));
    }
    Ok(())
}

impl TryFrom<i64> for StockCount {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StockCount> for i64 {
    fn from(value: StockCount) -> Self {
        value.0
    }
}

impl core::fmt::Display for StockCount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stock(q: i64) -> StockCount {
        StockCount::new(q).unwrap()
    }

    #[test]
    fn negative_quantity_is_invalid_stock() {
        assert_eq!(StockCount::new(-1), Err(DomainError::InvalidStock(-1)));
        assert_eq!(StockCount::new(0), Ok(StockCount::ZERO));
    }

    #[test]
    fn deduct_rejects_non_positive_amounts() {
        for amount in [0, -1, i64::MIN] {
            match stock(10).deduct(amount) {
                Err(DomainError::InvalidArgument(_)) => {}
                other => panic!("expected InvalidArgument for {amount}, got {other:?}"),
            }
        }
    }

    #[test]
    fn validate_quantity_accepts_only_positive() {
        assert_eq!(validate_quantity(1), Ok(()));
        assert_eq!(validate_quantity(i64::MAX), Ok(()));
        for amount in [0, -1, i64::MIN] {
            assert!(matches!(validate_quantity(amount), Err(DomainError::InvalidArgument(_))));
        }
    }

    #[test]
    fn deduct_more_than_available_reports_both_sides() {
        assert_eq!(
            stock(10).deduct(11),
            Err(DomainError::InsufficientStock {
                requested: 11,
                available: 10
            })
        );
    }

    #[test]
    fn deduct_to_exactly_zero() {
        let after = stock(5).deduct(5).unwrap();
        assert!(after.is_zero());
    }

    #[test]
    fn restore_and_add_increase() {
        assert_eq!(stock(0).restore(4).unwrap().quantity(), 4);
        assert_eq!(stock(1).add(2).unwrap().quantity(), 3);
        assert!(matches!(stock(1).restore(0), Err(DomainError::InvalidArgument(_))));
    }

    #[test]
    fn restore_overflow_is_rejected() {
        assert!(matches!(
            stock(i64::MAX).restore(1),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn deserializing_negative_fails() {
        assert!(serde_json::from_str::<StockCount>("-3").is_err());
        assert_eq!(serde_json::from_str::<StockCount>("3").unwrap(), stock(3));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: a deduction either succeeds with an exact difference or
        /// leaves nothing behind; it never produces a negative count.
        #[test]
        fn deduct_never_goes_negative(initial in 0i64..10_000, amount in -10i64..20_000) {
            let start = stock(initial);
            match start.deduct(amount) {
                Ok(after) => {
                    prop_assert!(amount > 0);
                    prop_assert!(after.quantity() >= 0);
                    prop_assert_eq!(after.quantity(), initial - amount);
                }
                Err(DomainError::InvalidArgument(_)) => prop_assert!(amount <= 0),
                Err(DomainError::InsufficientStock { requested, available }) => {
                    prop_assert_eq!(requested, amount);
                    prop_assert_eq!(available, initial);
                    prop_assert!(amount > initial);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
            prop_assert_eq!(start.quantity(), initial);
        }

        /// Property: deduct after restore of the same amount returns to the start.
        #[test]
        fn restore_then_deduct_is_identity(initial in 0i64..1_000_000, amount in 1i64..1_000_000) {
            let start = stock(initial);
            let back = start.restore(amount).unwrap().deduct(amount).unwrap();
            prop_assert_eq!(back, start);
        }
    }
}
