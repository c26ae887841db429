use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockguard_core::{DomainError, OptionId};
use stockguard_inventory::{DeductionRecord, InventoryItem, RestorationRecord, StockLine};

/// Stock store operation error.
///
/// `OptionNotFound` and `InsufficientStock` are ordinary business outcomes
/// (frequent under contention); `Conflict` and `Unavailable` are
/// infrastructure failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StockStoreError {
    #[error("no inventory row for option {0}")]
    OptionNotFound(OptionId),

    #[error("insufficient stock for option {option_id}: requested {requested}, available {available}")]
    InsufficientStock {
        option_id: OptionId,
        requested: i64,
        available: i64,
    },

    #[error("option {0} appears more than once in the batch")]
    DuplicateOption(OptionId),

    #[error("inventory row for option {0} already exists")]
    AlreadyExists(OptionId),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StockStoreError {
    /// Attribute a domain rejection to the option it happened on.
    pub fn from_domain(option_id: OptionId, err: DomainError) -> Self {
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
            } => StockStoreError::InsufficientStock {
                option_id,
                requested,
                available,
            },
            DomainError::InvalidArgument(msg) | DomainError::InvalidId(msg) => {
                StockStoreError::InvalidQuantity(msg)
            }
            DomainError::InvalidStock(q) => {
                StockStoreError::InvalidQuantity(format!("option {option_id}: negative stock {q}"))
            }
        }
    }
}

/// A bulk deduction that stopped at one line.
///
/// `applied` holds the records committed before the failing line. It is
/// always empty in [`BulkMode::Transactional`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bulk deduction failed at option {failed_option}: {source}")]
pub struct BulkDeductionError {
    pub failed_option: OptionId,
    #[source]
    pub source: StockStoreError,
    pub applied: Vec<DeductionRecord>,
}

impl BulkDeductionError {
    /// A failure detected before any line was attempted.
    pub fn rejected(failed_option: OptionId, source: StockStoreError) -> Self {
        Self {
            failed_option,
            source,
            applied: Vec::new(),
        }
    }
}

/// How a sorted batch is committed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkMode {
    /// Each line is its own atomic write. Lines before a failure stay applied.
    #[default]
    Sequential,
    /// All lines commit together or not at all.
    Transactional,
}

impl core::str::FromStr for BulkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(BulkMode::Sequential),
            "transactional" => Ok(BulkMode::Transactional),
            other => Err(format!(
                "unknown bulk mode '{other}' (expected sequential or transactional)"
            )),
        }
    }
}

/// Persistence boundary for per-option stock counters.
///
/// ## Atomicity
///
/// `deduct` must behave as one conditional write: the sufficiency check and
/// the decrement happen at the same instant, so concurrent callers against the
/// same option are linearized and the stored quantity never drops below zero.
/// Implementations must not read the balance, decide in application code, and
/// write it back unguarded.
///
/// ## Bulk ordering
///
/// `deduct_bulk` runs [`prepare_batch`] first, then touches rows in ascending
/// `OptionId` order. Two batches over overlapping options therefore acquire
/// row locks in the same relative order and cannot deadlock.
///
/// ## Validation
///
/// The service rejects non-positive amounts before any storage call. Backends
/// still refuse them with `InvalidQuantity` rather than turning a negative
/// deduction into an increment.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Insert a new row (catalog seeding).
    async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError>;

    /// Point read of the current row.
    async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError>;

    /// Single-item atomic conditional deduction.
    async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError>;

    /// Multi-item deduction in ascending option order.
    async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError>;

    /// Unconditional increment of an existing row.
    async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
        (**self).create_item(item).await
    }

    async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
        (**self).get_item(option_id).await
    }

    async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
        (**self).deduct(option_id, quantity).await
    }

    async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        (**self).deduct_bulk(lines).await
    }

    async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
        (**self).restore(option_id, quantity).await
    }
}

/// Reject duplicate options, then sort ascending by `OptionId`.
///
/// This is the single global lock order shared by every backend.
pub fn prepare_batch(lines: &[StockLine]) -> Result<Vec<StockLine>, BulkDeductionError> {
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.option_id) {
            return Err(BulkDeductionError::rejected(
                line.option_id,
                StockStoreError::DuplicateOption(line.option_id),
            ));
        }
    }

    let mut sorted = lines.to_vec();
    sorted.sort_by_key(|line| line.option_id);
    Ok(sorted)
}
