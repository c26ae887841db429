//! Optimistic stock store for backends without a conditional `UPDATE`.
//!
//! A pure key-value store can still give linearizable deductions: read the
//! item together with its version, compute the next value with the domain
//! transform, and write it back only if the version is unchanged. A lost race
//! re-reads and tries again, up to a bounded number of attempts.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use stockguard_core::{AggregateRoot, ExpectedVersion, OptionId};
use stockguard_inventory::{DeductionRecord, InventoryItem, RestorationRecord, StockLine};

use super::r#trait::{prepare_batch, BulkDeductionError, InventoryStore, StockStoreError};

pub const DEFAULT_MAX_RETRIES: u32 = 16;

/// Versioned cells: the minimal contract a key-value backend must offer.
pub trait ItemCells: Send + Sync {
    fn load(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError>;

    fn insert(&self, item: InventoryItem) -> Result<(), StockStoreError>;

    /// Replace the stored item only if its version matches `expected`.
    ///
    /// Returns `Ok(false)` on a version mismatch.
    fn compare_and_set(&self, expected: ExpectedVersion, item: InventoryItem) -> Result<bool, StockStoreError>;
}

/// In-memory versioned cells.
#[derive(Debug, Default)]
pub struct InMemoryCells {
    cells: RwLock<HashMap<OptionId, InventoryItem>>,
}

impl InMemoryCells {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemCells for InMemoryCells {
    fn load(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
        let cells = self
            .cells
            .read()
            .map_err(|_| StockStoreError::Unavailable("cells lock poisoned".to_string()))?;
        Ok(cells.get(&option_id).cloned())
    }

    fn insert(&self, item: InventoryItem) -> Result<(), StockStoreError> {
        let mut cells = self
            .cells
            .write()
            .map_err(|_| StockStoreError::Unavailable("cells lock poisoned".to_string()))?;
        match cells.entry(item.option_id()) {
            Entry::Occupied(_) => Err(StockStoreError::AlreadyExists(item.option_id())),
            Entry::Vacant(slot) => {
                slot.insert(item);
                Ok(())
            }
        }
    }

    fn compare_and_set(&self, expected: ExpectedVersion, item: InventoryItem) -> Result<bool, StockStoreError> {
        let mut cells = self
            .cells
            .write()
            .map_err(|_| StockStoreError::Unavailable("cells lock poisoned".to_string()))?;
        let Some(current) = cells.get_mut(&item.option_id()) else {
            return Err(StockStoreError::OptionNotFound(item.option_id()));
        };
        if !expected.matches(current.version()) {
            return Ok(false);
        }
        *current = item;
        Ok(true)
    }
}

/// Stock store built on version-checked writes with bounded retry.
///
/// Bulk deductions are always sequential here: there is no multi-key
/// transaction to roll back, so lines before a failure stay applied.
#[derive(Debug)]
pub struct OptimisticInventoryStore<C> {
    cells: C,
    max_retries: u32,
}

impl<C> OptimisticInventoryStore<C> {
    pub fn new(cells: C) -> Self {
        Self::with_max_retries(cells, DEFAULT_MAX_RETRIES)
    }

    /// `max_retries` counts attempts; values below 1 are treated as 1.
    pub fn with_max_retries(cells: C, max_retries: u32) -> Self {
        Self {
            cells,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl<C: ItemCells> OptimisticInventoryStore<C> {
    /// Read, transform, conditionally write; retry on version conflicts.
    async fn modify<F>(&self, option_id: OptionId, transform: F) -> Result<InventoryItem, StockStoreError>
    where
        F: Fn(&InventoryItem) -> Result<InventoryItem, StockStoreError>,
    {
        for attempt in 1..=self.max_retries {
            let current = self
                .cells
                .load(option_id)?
                .ok_or(StockStoreError::OptionNotFound(option_id))?;
            let next = transform(&current)?;

            if self
                .cells
                .compare_and_set(ExpectedVersion::Exact(current.version()), next.clone())?
            {
                return Ok(next);
            }

            debug!(%option_id, attempt, "version conflict, retrying");
            tokio::task::yield_now().await;
        }

        warn!(%option_id, attempts = self.max_retries, "giving up after repeated version conflicts");
        Err(StockStoreError::Conflict(format!(
            "option {option_id}: still conflicting after {} attempts",
            self.max_retries
        )))
    }
}

#[async_trait]
impl<C: ItemCells> InventoryStore for OptimisticInventoryStore<C> {
    async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
        self.cells.insert(item)
    }

    async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
        self.cells.load(option_id)
    }

    #[instrument(skip(self), fields(option_id = %option_id))]
    async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
        let next = self
            .modify(option_id, |item| {
                item.deduct_stock(quantity)
                    .map_err(|e| StockStoreError::from_domain(option_id, e))
            })
            .await?;
        Ok(DeductionRecord::from_new_balance(option_id, quantity, next.quantity()))
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let sorted = prepare_batch(lines)?;
        let mut applied = Vec::with_capacity(sorted.len());
        for line in &sorted {
            match self.deduct(line.option_id, line.quantity).await {
                Ok(record) => applied.push(record),
                Err(source) => {
                    return Err(BulkDeductionError {
                        failed_option: line.option_id,
                        source,
                        applied,
                    });
                }
            }
        }
        Ok(applied)
    }

    #[instrument(skip(self), fields(option_id = %option_id))]
    async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
        let next = self
            .modify(option_id, |item| {
                item.restore_stock(quantity)
                    .map_err(|e| StockStoreError::from_domain(option_id, e))
            })
            .await?;
        Ok(RestorationRecord::from_new_balance(option_id, quantity, next.quantity()))
    }
}
