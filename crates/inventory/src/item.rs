use serde::{Deserialize, Serialize};

use stockguard_core::{AggregateRoot, DomainResult, OptionId, ProductId};

use crate::stock::StockCount;

/// Aggregate root: the stock held for one sellable option.
///
/// Transitions are pure: `deduct_stock`/`restore_stock` return the next state
/// and leave `self` untouched. Two callers holding copies of the same item
/// can both "succeed" in memory; only the store's atomic path decides which
/// change actually lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    option_id: OptionId,
    product_id: ProductId,
    stock: StockCount,
    is_available: bool,
    version: u64,
}

impl InventoryItem {
    /// Create a new, available item with an initial stock count.
    pub fn new(option_id: OptionId, product_id: ProductId, stock: StockCount) -> Self {
        Self {
            option_id,
            product_id,
            stock,
            is_available: true,
            version: 0,
        }
    }

    /// Rebuild an item from stored state.
    pub fn from_parts(
        option_id: OptionId,
        product_id: ProductId,
        stock: StockCount,
        is_available: bool,
        version: u64,
    ) -> Self {
        Self {
            option_id,
            product_id,
            stock,
            is_available,
            version,
        }
    }

    pub fn with_availability(mut self, is_available: bool) -> Self {
        self.is_available = is_available;
        self
    }

    pub fn option_id(&self) -> OptionId {
        self.option_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn stock(&self) -> StockCount {
        self.stock
    }

    pub fn quantity(&self) -> i64 {
        self.stock.quantity()
    }

    pub fn is_available(&self) -> bool {
        self.is_available
    }

    /// Sales toggle and balance together.
    pub fn has_enough_stock(&self, amount: i64) -> bool {
        self.is_available && self.stock.has_enough(amount)
    }

    /// Does not consult `is_available`; callers check `has_enough_stock` first.
    pub fn deduct_stock(&self, amount: i64) -> DomainResult<Self> {
        let stock = self.stock.deduct(amount)?;
        Ok(self.next(stock))
    }

    pub fn restore_stock(&self, amount: i64) -> DomainResult<Self> {
        let stock = self.stock.restore(amount)?;
        Ok(self.next(stock))
    }

    fn next(&self, stock: StockCount) -> Self {
        Self {
            stock,
            version: self.version + 1,
            ..self.clone()
        }
    }
}

impl AggregateRoot for InventoryItem {
    type Id = OptionId;

    fn id(&self) -> &Self::Id {
        &self.option_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockguard_core::DomainError;

    fn item(quantity: i64) -> InventoryItem {
        InventoryItem::new(
            OptionId::new(1),
            ProductId::new(100),
            StockCount::new(quantity).unwrap(),
        )
    }

    #[test]
    fn deduct_returns_next_state_and_bumps_version() {
        let before = item(10);
        let after = before.deduct_stock(4).unwrap();

        assert_eq!(before.quantity(), 10);
        assert_eq!(before.version(), 0);
        assert_eq!(after.quantity(), 6);
        assert_eq!(after.version(), 1);
        assert_eq!(after.option_id(), before.option_id());
    }

    #[test]
    fn unavailable_item_never_has_enough() {
        let hidden = item(10).with_availability(false);
        assert!(!hidden.has_enough_stock(1));
        assert!(item(10).has_enough_stock(10));
        assert!(!item(10).has_enough_stock(11));
    }

    #[test]
    fn deduct_ignores_availability_flag() {
        let hidden = item(3).with_availability(false);
        assert_eq!(hidden.deduct_stock(3).unwrap().quantity(), 0);
    }

    #[test]
    fn deduct_propagates_stock_errors() {
        assert_eq!(
            item(2).deduct_stock(3),
            Err(DomainError::InsufficientStock {
                requested: 3,
                available: 2
            })
        );
        assert!(matches!(item(2).restore_stock(-5), Err(DomainError::InvalidArgument(_))));
    }

    #[test]
    fn restore_increases_without_upper_bound() {
        let after = item(0).restore_stock(1_000_000).unwrap();
        assert_eq!(after.quantity(), 1_000_000);
    }
}
