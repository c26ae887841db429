//! Inventory orchestration (application-level entry point).
//!
//! The service is what order and checkout workflows call. It validates input,
//! delegates to an [`InventoryStore`], and turns store failures into the four
//! caller-facing kinds of [`InventoryError`].
//!
//! ## Flow
//!
//! ```text
//! deduct_stock / deduct_stocks / restore_stock
//!   ↓
//! 1. Validate quantities (no storage call on bad input)
//!   ↓
//! 2. One atomic store operation (conditional write per option)
//!   ↓
//! 3. Map StockStoreError → InventoryError, log at the right level
//! ```
//!
//! The service holds no locks and no mutable state; it is safe to share
//! across tasks behind an `Arc`.
//!
//! ## Not idempotent
//!
//! `order_id` is carried into spans and log lines for correlation only.
//! Calling `deduct_stock` twice with the same order deducts twice.
//!
//! ## Bulk batches
//!
//! Whether a failing batch leaves earlier lines applied depends on the
//! store's [`BulkMode`](crate::stock_store::BulkMode). With the default
//! sequential mode it does, and nothing here undoes them. Store-side batch
//! failures come back as [`InventoryError::BatchFailed`], which names the
//! failing option and carries the records already applied; a caller that
//! needs compensation calls `restore_stock` for each of them.

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use stockguard_core::{OptionId, OrderId, ProductId};
use stockguard_inventory::{
    validate_quantity, DeductionRecord, InventoryItem, RestorationRecord, StockCount, StockLine,
    StockStatus,
};

use crate::stock_store::{BulkDeductionError, InventoryStore, StockStoreError};

/// Caller-facing failure kinds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InventoryError {
    /// Non-positive quantity, duplicate batch line, malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No inventory row exists for the option.
    #[error("option {0} not found")]
    OptionNotFound(OptionId),

    /// Not enough stock at the instant of the write.
    #[error("insufficient stock for option {option_id}: requested {requested}, available {available}")]
    InsufficientStock {
        option_id: OptionId,
        requested: i64,
        available: i64,
    },

    /// An optimistic backend kept losing the race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store could not be reached. Not retried here.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A bulk deduction stopped at `failed_option`.
    ///
    /// `applied` lists the lines that stayed deducted (always empty in
    /// transactional mode); `source` is the failing line's own error.
    #[error("batch failed at option {failed_option} with {} line(s) applied: {source}", .applied.len())]
    BatchFailed {
        failed_option: OptionId,
        applied: Vec<DeductionRecord>,
        source: Box<InventoryError>,
    },
}

impl InventoryError {
    /// The underlying failure, looking through [`InventoryError::BatchFailed`].
    pub fn kind(&self) -> &InventoryError {
        match self {
            InventoryError::BatchFailed { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Expected outcomes that callers render to users rather than alert on.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self.kind(),
            InventoryError::InvalidArgument(_)
                | InventoryError::OptionNotFound(_)
                | InventoryError::InsufficientStock { .. }
        )
    }
}

impl From<StockStoreError> for InventoryError {
    fn from(value: StockStoreError) -> Self {
        match value {
            StockStoreError::OptionNotFound(id) => InventoryError::OptionNotFound(id),
            StockStoreError::InsufficientStock {
                option_id,
                requested,
                available,
            } => InventoryError::InsufficientStock {
                option_id,
                requested,
                available,
            },
            StockStoreError::DuplicateOption(id) => {
                InventoryError::InvalidArgument(format!("option {id} appears more than once in the batch"))
            }
            StockStoreError::AlreadyExists(id) => {
                InventoryError::InvalidArgument(format!("option {id} is already registered"))
            }
            StockStoreError::InvalidQuantity(msg) => InventoryError::InvalidArgument(msg),
            StockStoreError::Conflict(msg) => InventoryError::Conflict(msg),
            StockStoreError::Unavailable(msg) => InventoryError::StorageUnavailable(msg),
        }
    }
}

impl From<BulkDeductionError> for InventoryError {
    fn from(value: BulkDeductionError) -> Self {
        InventoryError::BatchFailed {
            failed_option: value.failed_option,
            applied: value.applied,
            source: Box::new(value.source.into()),
        }
    }
}

/// Inventory entry point for order/checkout collaborators.
///
/// Generic over the store so tests run against the in-memory backend and
/// production against Postgres without changing callers.
#[derive(Debug)]
pub struct InventoryService<S> {
    store: S,
}

impl<S> InventoryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> InventoryService<S>
where
    S: InventoryStore,
{
    /// Seed a row for a new option (catalog collaborator).
    #[instrument(skip(self), fields(option_id = %option_id))]
    pub async fn register_item(
        &self,
        option_id: OptionId,
        product_id: ProductId,
        initial_stock: i64,
        is_available: bool,
    ) -> Result<InventoryItem, InventoryError> {
        let stock = StockCount::new(initial_stock)
            .map_err(|e| InventoryError::InvalidArgument(e.to_string()))?;
        let item = InventoryItem::new(option_id, product_id, stock).with_availability(is_available);
        self.store
            .create_item(item.clone())
            .await
            .map_err(|e| log_failure("register_item", e.into()))?;
        info!(%option_id, initial_stock, "inventory item registered");
        Ok(item)
    }

    /// Read-only availability check.
    pub async fn check_stock(&self, option_id: OptionId, quantity: i64) -> Result<StockStatus, InventoryError> {
        ensure_positive(option_id, quantity)?;
        let item = self
            .store
            .get_item(option_id)
            .await
            .map_err(InventoryError::from)?
            .ok_or(InventoryError::OptionNotFound(option_id))?;

        Ok(StockStatus {
            option_id,
            current_stock: item.quantity(),
            requested_quantity: quantity,
            is_available: item.has_enough_stock(quantity),
        })
    }

    /// Deduct from one option through the store's atomic conditional write.
    #[instrument(skip(self), fields(option_id = %option_id, order_id = %order_id))]
    pub async fn deduct_stock(
        &self,
        option_id: OptionId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<DeductionRecord, InventoryError> {
        ensure_positive(option_id, quantity)?;

        let record = self
            .store
            .deduct(option_id, quantity)
            .await
            .map_err(|e| log_failure("deduct_stock", e.into()))?;

        info!(
            previous = record.previous_stock,
            current = record.current_stock,
            "stock deducted"
        );
        Ok(record)
    }

    /// Deduct several options for one order.
    ///
    /// Every quantity is validated before the first write; one bad line
    /// rejects the whole batch untouched.
    #[instrument(skip(self, items), fields(lines = items.len(), order_id = %order_id))]
    pub async fn deduct_stocks(
        &self,
        items: &[StockLine],
        order_id: OrderId,
    ) -> Result<Vec<DeductionRecord>, InventoryError> {
        if items.is_empty() {
            return Err(InventoryError::InvalidArgument(
                "batch must contain at least one line".to_string(),
            ));
        }
        for line in items {
            ensure_positive(line.option_id, line.quantity)?;
        }

        match self.store.deduct_bulk(items).await {
            Ok(records) => {
                info!(lines = records.len(), "batch deducted");
                Ok(records)
            }
            Err(err) => {
                if !err.applied.is_empty() {
                    warn!(
                        failed_option = %err.failed_option,
                        applied = err.applied.len(),
                        "batch stopped part-way; earlier lines remain deducted"
                    );
                }
                Err(log_failure("deduct_stocks", err.into()))
            }
        }
    }

    /// Give stock back to an existing option. No sufficiency check.
    #[instrument(skip(self), fields(option_id = %option_id, order_id = %order_id))]
    pub async fn restore_stock(
        &self,
        option_id: OptionId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<RestorationRecord, InventoryError> {
        ensure_positive(option_id, quantity)?;

        let record = self
            .store
            .restore(option_id, quantity)
            .await
            .map_err(|e| log_failure("restore_stock", e.into()))?;

        info!(
            previous = record.previous_stock,
            current = record.current_stock,
            "stock restored"
        );
        Ok(record)
    }
}

fn ensure_positive(option_id: OptionId, quantity: i64) -> Result<(), InventoryError> {
    validate_quantity(quantity).map_err(|e| {
        debug!(%option_id, quantity, "rejecting non-positive quantity");
        InventoryError::InvalidArgument(format!("option {option_id}: {e}"))
    })
}

/// Business rejections are routine under contention; only infrastructure
/// failures are logged as errors.
fn log_failure(operation: &'static str, err: InventoryError) -> InventoryError {
    if err.is_business_rejection() {
        debug!(operation, error = %err, "request rejected");
    } else {
        error!(operation, error = %err, "inventory operation failed");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::stock_store::{BulkMode, InMemoryInventoryStore};

    /// Counts store calls so validation can be shown to short-circuit.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryInventoryStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl InventoryStore for CountingStore {
        async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
            self.inner.create_item(item).await
        }

        async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
            self.hit();
            self.inner.get_item(option_id).await
        }

        async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
            self.hit();
            self.inner.deduct(option_id, quantity).await
        }

        async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
            self.hit();
            self.inner.deduct_bulk(lines).await
        }

        async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
            self.hit();
            self.inner.restore(option_id, quantity).await
        }
    }

    /// Store that is never reachable.
    struct DownStore;

    #[async_trait]
    impl InventoryStore for DownStore {
        async fn create_item(&self, _item: InventoryItem) -> Result<(), StockStoreError> {
            Err(StockStoreError::Unavailable("connection refused".to_string()))
        }

        async fn get_item(&self, _option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
            Err(StockStoreError::Unavailable("connection refused".to_string()))
        }

        async fn deduct(&self, _option_id: OptionId, _quantity: i64) -> Result<DeductionRecord, StockStoreError> {
            Err(StockStoreError::Unavailable("connection refused".to_string()))
        }

        async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
            Err(BulkDeductionError::rejected(
                lines[0].option_id,
                StockStoreError::Unavailable("connection refused".to_string()),
            ))
        }

        async fn restore(&self, _option_id: OptionId, _quantity: i64) -> Result<RestorationRecord, StockStoreError> {
            Err(StockStoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// Applies the first sorted line, then loses the connection.
    #[derive(Default)]
    struct FailAfterFirstLine {
        inner: InMemoryInventoryStore,
    }

    #[async_trait]
    impl InventoryStore for FailAfterFirstLine {
        async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
            self.inner.create_item(item).await
        }

        async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
            self.inner.get_item(option_id).await
        }

        async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
            self.inner.deduct(option_id, quantity).await
        }

        async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
            let sorted = crate::stock_store::prepare_batch(lines)?;
            let first = sorted[0];
            let record = self
                .inner
                .deduct(first.option_id, first.quantity)
                .await
                .map_err(|e| BulkDeductionError::rejected(first.option_id, e))?;
            Err(BulkDeductionError {
                failed_option: sorted[1].option_id,
                source: StockStoreError::Unavailable("conn reset".to_string()),
                applied: vec![record],
            })
        }

        async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
            self.inner.restore(option_id, quantity).await
        }
    }

    const ORDER: OrderId = OrderId::new(77);

    fn opt(id: i64) -> OptionId {
        OptionId::new(id)
    }

    async fn service_with(rows: &[(i64, i64)]) -> InventoryService<CountingStore> {
        let service = InventoryService::new(CountingStore::default());
        for &(id, stock) in rows {
            service
                .register_item(opt(id), ProductId::new(1), stock, true)
                .await
                .unwrap();
        }
        service
    }

    #[tokio::test]
    async fn non_positive_quantities_never_reach_the_store() {
        let service = service_with(&[(1, 10)]).await;

        for bad in [0, -1] {
            assert!(matches!(
                service.deduct_stock(opt(1), bad, ORDER).await,
                Err(InventoryError::InvalidArgument(_))
            ));
            assert!(matches!(
                service.restore_stock(opt(1), bad, ORDER).await,
                Err(InventoryError::InvalidArgument(_))
            ));
            assert!(matches!(
                service.check_stock(opt(1), bad).await,
                Err(InventoryError::InvalidArgument(_))
            ));
        }
        assert_eq!(service.store().calls(), 0);
    }

    #[tokio::test]
    async fn one_bad_line_rejects_the_whole_batch_before_any_write() {
        let service = service_with(&[(1, 10), (2, 10)]).await;
        let lines = [StockLine::new(opt(1), 3), StockLine::new(opt(2), 0)];

        assert!(matches!(
            service.deduct_stocks(&lines, ORDER).await,
            Err(InventoryError::InvalidArgument(_))
        ));
        assert_eq!(service.store().calls(), 0);
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 10);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let service = service_with(&[]).await;
        assert!(matches!(
            service.deduct_stocks(&[], ORDER).await,
            Err(InventoryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_lines_are_invalid_argument() {
        let service = service_with(&[(1, 10)]).await;
        let lines = [StockLine::new(opt(1), 1), StockLine::new(opt(1), 2)];
        let err = service.deduct_stocks(&lines, ORDER).await.unwrap_err();
        assert!(matches!(
            &err,
            InventoryError::BatchFailed { failed_option, applied, .. }
                if *failed_option == opt(1) && applied.is_empty()
        ));
        assert!(matches!(err.kind(), InventoryError::InvalidArgument(_)));
        assert!(err.is_business_rejection());
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 10);
    }

    #[tokio::test]
    async fn over_deduction_reports_requested_and_available() {
        let service = service_with(&[(1, 10)]).await;
        let err = service.deduct_stock(opt(1), 11, ORDER).await.unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                option_id: opt(1),
                requested: 11,
                available: 10
            }
        );
        assert!(err.is_business_rejection());
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 10);
    }

    #[tokio::test]
    async fn not_found_is_distinct_from_insufficient() {
        let service = service_with(&[]).await;
        assert_eq!(
            service.deduct_stock(opt(5), 1, ORDER).await,
            Err(InventoryError::OptionNotFound(opt(5)))
        );
        assert_eq!(
            service.restore_stock(opt(5), 1, ORDER).await,
            Err(InventoryError::OptionNotFound(opt(5)))
        );
        assert_eq!(
            service.check_stock(opt(5), 1).await,
            Err(InventoryError::OptionNotFound(opt(5)))
        );
    }

    #[tokio::test]
    async fn same_order_deducts_twice() {
        let service = service_with(&[(1, 10)]).await;
        service.deduct_stock(opt(1), 2, ORDER).await.unwrap();
        let second = service.deduct_stock(opt(1), 2, ORDER).await.unwrap();
        assert_eq!(second.previous_stock, 8);
        assert_eq!(second.current_stock, 6);
    }

    #[tokio::test]
    async fn check_stock_reports_availability() {
        let service = service_with(&[(1, 3)]).await;
        service
            .register_item(opt(2), ProductId::new(1), 50, false)
            .await
            .unwrap();

        let status = service.check_stock(opt(1), 3).await.unwrap();
        assert_eq!(
            status,
            StockStatus {
                option_id: opt(1),
                current_stock: 3,
                requested_quantity: 3,
                is_available: true
            }
        );
        assert!(!service.check_stock(opt(1), 4).await.unwrap().is_available);
        assert!(!service.check_stock(opt(2), 1).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn restore_after_deduct_round_trips() {
        let service = service_with(&[(1, 5)]).await;
        service.deduct_stock(opt(1), 5, ORDER).await.unwrap();
        let record = service.restore_stock(opt(1), 5, ORDER).await.unwrap();
        assert_eq!(record.previous_stock, 0);
        assert_eq!(record.current_stock, 5);
    }

    #[tokio::test]
    async fn register_rejects_negative_and_duplicate() {
        let service = service_with(&[(1, 5)]).await;
        assert!(matches!(
            service.register_item(opt(2), ProductId::new(1), -1, true).await,
            Err(InventoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.register_item(opt(1), ProductId::new(1), 5, true).await,
            Err(InventoryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_store_is_storage_unavailable() {
        let service = InventoryService::new(DownStore);
        let err = service.deduct_stock(opt(1), 1, ORDER).await.unwrap_err();
        assert!(matches!(err, InventoryError::StorageUnavailable(_)));
        assert!(!err.is_business_rejection());

        let err = service
            .deduct_stocks(&[StockLine::new(opt(1), 1)], ORDER)
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), InventoryError::StorageUnavailable(_)));
        assert!(!err.is_business_rejection());
    }

    #[tokio::test]
    async fn bulk_failure_names_the_failing_option() {
        let store = InMemoryInventoryStore::with_bulk_mode(BulkMode::Sequential);
        let service = InventoryService::new(store);
        service.register_item(opt(1), ProductId::new(1), 10, true).await.unwrap();
        service.register_item(opt(2), ProductId::new(1), 1, true).await.unwrap();

        let lines = [StockLine::new(opt(2), 2), StockLine::new(opt(1), 2)];
        let err = service.deduct_stocks(&lines, ORDER).await.unwrap_err();
        assert_eq!(
            err,
            InventoryError::BatchFailed {
                failed_option: opt(2),
                applied: vec![DeductionRecord::from_new_balance(opt(1), 2, 8)],
                source: Box::new(InventoryError::InsufficientStock {
                    option_id: opt(2),
                    requested: 2,
                    available: 1
                }),
            }
        );
        // Sequential mode: option 1 sorted first and stays deducted.
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 8);
    }

    #[tokio::test]
    async fn mid_batch_outage_reports_applied_lines_for_compensation() {
        let service = InventoryService::new(FailAfterFirstLine::default());
        service.register_item(opt(1), ProductId::new(1), 10, true).await.unwrap();
        service.register_item(opt(2), ProductId::new(1), 10, true).await.unwrap();

        let lines = [StockLine::new(opt(2), 4), StockLine::new(opt(1), 3)];
        let err = service.deduct_stocks(&lines, ORDER).await.unwrap_err();

        let (failed_option, applied, source) = match err {
            InventoryError::BatchFailed {
                failed_option,
                applied,
                source,
            } => (failed_option, applied, source),
            other => panic!("expected BatchFailed, got {other:?}"),
        };
        assert_eq!(failed_option, opt(2));
        assert_eq!(*source, InventoryError::StorageUnavailable("conn reset".to_string()));
        assert_eq!(applied, vec![DeductionRecord::from_new_balance(opt(1), 3, 7)]);
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 7);

        for record in &applied {
            service
                .restore_stock(record.option_id, record.deducted_quantity, ORDER)
                .await
                .unwrap();
        }
        assert_eq!(service.check_stock(opt(1), 1).await.unwrap().current_stock, 10);
        assert_eq!(service.check_stock(opt(2), 1).await.unwrap().current_stock, 10);
    }
}
