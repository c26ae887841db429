use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tracing::{debug, instrument};

use stockguard_core::OptionId;
use stockguard_inventory::{DeductionRecord, InventoryItem, RestorationRecord, StockLine};

use super::r#trait::{
    prepare_batch, BulkDeductionError, BulkMode, InventoryStore, StockStoreError,
};

type Row = Arc<Mutex<InventoryItem>>;

/// In-memory stock store.
///
/// Each option row sits behind its own `Mutex`; the outer `RwLock` only
/// guards the row directory. A deduction takes the row lock, checks the
/// balance and writes the new value inside the same critical section, which
/// is the in-process equivalent of a conditional `UPDATE`. Deductions against
/// different options never contend.
///
/// Intended for tests/dev and single-process deployments. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    rows: RwLock<HashMap<OptionId, Row>>,
    bulk_mode: BulkMode,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bulk_mode(bulk_mode: BulkMode) -> Self {
        Self {
            rows: RwLock::default(),
            bulk_mode,
        }
    }

    pub fn bulk_mode(&self) -> BulkMode {
        self.bulk_mode
    }

    fn row(&self, option_id: OptionId) -> Result<Row, StockStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StockStoreError::Unavailable("row directory lock poisoned".to_string()))?;
        rows.get(&option_id)
            .cloned()
            .ok_or(StockStoreError::OptionNotFound(option_id))
    }

    fn deduct_now(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
        let row = self.row(option_id)?;
        let mut current = lock_row(&row, option_id)?;
        apply_deduction(&mut current, quantity)
    }

    fn deduct_sequential(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let mut applied = Vec::with_capacity(lines.len());
        for line in lines {
            match self.deduct_now(line.option_id, line.quantity) {
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

    fn deduct_transactional(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let mut rows = Vec::with_capacity(lines.len());
        for line in lines {
            let row = self
                .row(line.option_id)
                .map_err(|e| BulkDeductionError::rejected(line.option_id, e))?;
            rows.push(row);
        }

        // Lines are sorted, so guards are taken in ascending option order.
        let mut guards: Vec<MutexGuard<'_, InventoryItem>> = Vec::with_capacity(rows.len());
        for (line, row) in lines.iter().zip(&rows) {
            let guard = lock_row(row, line.option_id)
                .map_err(|e| BulkDeductionError::rejected(line.option_id, e))?;
            guards.push(guard);
        }

        // Validate everything before touching anything.
        let mut next = Vec::with_capacity(lines.len());
        for (line, guard) in lines.iter().zip(&guards) {
            let item = guard.deduct_stock(line.quantity).map_err(|e| {
                BulkDeductionError::rejected(line.option_id, StockStoreError::from_domain(line.option_id, e))
            })?;
            next.push(item);
        }

        let mut records = Vec::with_capacity(lines.len());
        for ((line, guard), item) in lines.iter().zip(guards.iter_mut()).zip(next) {
            records.push(DeductionRecord::from_new_balance(
                line.option_id,
                line.quantity,
                item.quantity(),
            ));
            **guard = item;
        }
        Ok(records)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StockStoreError::Unavailable("row directory lock poisoned".to_string()))?;
        match rows.entry(item.option_id()) {
            Entry::Occupied(_) => Err(StockStoreError::AlreadyExists(item.option_id())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(item)));
                Ok(())
            }
        }
    }

    async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
        let row = match self.row(option_id) {
            Ok(row) => row,
            Err(StockStoreError::OptionNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let item = lock_row(&row, option_id)?;
        Ok(Some(item.clone()))
    }

    #[instrument(skip(self), fields(option_id = %option_id))]
    async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
        self.deduct_now(option_id, quantity)
    }

    #[instrument(skip(self, lines), fields(lines = lines.len(), mode = ?self.bulk_mode))]
    async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let sorted = prepare_batch(lines)?;
        debug!(order = ?sorted.iter().map(|l| l.option_id.get()).collect::<Vec<_>>(), "applying batch");
        match self.bulk_mode {
            BulkMode::Sequential => self.deduct_sequential(&sorted),
            BulkMode::Transactional => self.deduct_transactional(&sorted),
        }
    }

    #[instrument(skip(self), fields(option_id = %option_id))]
    async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
        let row = self.row(option_id)?;
        let mut current = lock_row(&row, option_id)?;
        let next = current
            .restore_stock(quantity)
            .map_err(|e| StockStoreError::from_domain(option_id, e))?;
        let record = RestorationRecord::from_new_balance(option_id, quantity, next.quantity());
        *current = next;
        Ok(record)
    }
}

fn lock_row(row: &Row, option_id: OptionId) -> Result<MutexGuard<'_, InventoryItem>, StockStoreError> {
    row.lock()
        .map_err(|_| StockStoreError::Unavailable(format!("row lock for option {option_id} poisoned")))
}

/// Check-and-decrement; the caller holds the row lock.
fn apply_deduction(current: &mut InventoryItem, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
    let option_id = current.option_id();
    let next = current
        .deduct_stock(quantity)
        .map_err(|e| StockStoreError::from_domain(option_id, e))?;
    let record = DeductionRecord::from_new_balance(option_id, quantity, next.quantity());
    *current = next;
    Ok(record)
}
