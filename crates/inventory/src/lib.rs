//! Inventory domain module.
//!
//! Business rules for per-option stock counts, implemented purely as
//! deterministic domain logic (no IO, no locking, no storage). The guarantee
//! against concurrent overselling lives in the store layer, which applies
//! these transforms atomically per option.

pub mod item;
pub mod records;
pub mod stock;

pub use item::InventoryItem;
pub use records::{DeductionRecord, RestorationRecord, StockLine, StockStatus};
pub use stock::{validate_quantity, StockCount};
