//! Infrastructure layer: stock stores, the inventory service, configuration.

pub mod config;
pub mod inventory_service;
pub mod stock_store;

pub use config::{ConfigError, InventoryBackend, InventoryConfig};
pub use inventory_service::{InventoryError, InventoryService};
