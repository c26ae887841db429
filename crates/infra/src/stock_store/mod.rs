//! Stock store boundary.
//!
//! One trait, three backends: a per-row-locked in-memory store, an optimistic
//! version-checked store for plain key-value backends, and Postgres.

pub mod in_memory;
pub mod optimistic;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use optimistic::{InMemoryCells, ItemCells, OptimisticInventoryStore};
pub use postgres::PostgresInventoryStore;
pub use r#trait::{prepare_batch, BulkDeductionError, BulkMode, InventoryStore, StockStoreError};
