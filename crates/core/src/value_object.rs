//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// derive a new value from it; the holder rebinds its field to the result.
///
/// ```ignore
/// let stock = StockCount::new(10)?;
/// let after = stock.deduct(3)?;
/// assert_eq!(stock.quantity(), 10); // the original is untouched
/// assert_eq!(after.quantity(), 7);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
