//! Postgres-backed stock store.
//!
//! Every deduction is a single conditional statement:
//!
//! ```sql
//! UPDATE inventory_stock
//!    SET quantity = quantity - $2, version = version + 1, updated_at = NOW()
//!  WHERE option_id = $1 AND quantity >= $2
//! RETURNING quantity
//! ```
//!
//! The `WHERE` clause re-checks sufficiency while the row-level write lock is
//! held, so concurrent deductions against one option are serialized by the
//! engine and the balance can never go negative. When no row comes back a
//! follow-up `SELECT` tells "option missing" apart from "not enough stock".
//! That read is a separate statement: a restore landing in between can yield
//! `InsufficientStock` whose `available` already covers `requested`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StockStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` on insert, `Conflict` elsewhere |
//! | Database (check constraint violation) | `23514` | `InvalidQuantity` |
//! | Database (numeric out of range) | `22003` | `InvalidQuantity` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` |
//! | Other | N/A | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{field, instrument, warn, Span};

use stockguard_core::{AggregateRoot, OptionId, ProductId};
use stockguard_inventory::{
    validate_quantity, DeductionRecord, InventoryItem, RestorationRecord, StockCount, StockLine,
};

use super::r#trait::{prepare_batch, BulkDeductionError, BulkMode, InventoryStore, StockStoreError};

/// Table definition used by [`PostgresInventoryStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_stock (
    option_id    BIGINT PRIMARY KEY,
    product_id   BIGINT NOT NULL,
    quantity     BIGINT NOT NULL CHECK (quantity >= 0),
    is_available BOOLEAN NOT NULL DEFAULT TRUE,
    version      BIGINT NOT NULL DEFAULT 0,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Postgres-backed stock store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool (Arc + Send + Sync). The store itself holds
/// no mutable state; correctness rests on the conditional statements.
///
/// ## Bulk deductions
///
/// Lines are sorted by `option_id` first. In [`BulkMode::Sequential`] each
/// conditional update commits on its own, so a failure leaves earlier lines
/// applied. In [`BulkMode::Transactional`] the sorted updates run inside one
/// transaction that is rolled back on the first failure.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
    bulk_mode: BulkMode,
}

impl PostgresInventoryStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_bulk_mode(pool, BulkMode::default())
    }

    pub fn with_bulk_mode(pool: PgPool, bulk_mode: BulkMode) -> Self {
        Self {
            pool: Arc::new(pool),
            bulk_mode,
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        bulk_mode: BulkMode,
    ) -> Result<Self, StockStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::with_bulk_mode(pool, bulk_mode))
    }

    pub fn bulk_mode(&self) -> BulkMode {
        self.bulk_mode
    }

    /// Create the `inventory_stock` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), StockStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn deduct_sequential(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                let first = lines.first().map(|l| l.option_id).unwrap_or(OptionId::new(0));
                return Err(BulkDeductionError::rejected(first, map_sqlx_error("acquire", e)));
            }
        };

        let mut applied = Vec::with_capacity(lines.len());
        for line in lines {
            match conditional_deduct(&mut *conn, line.option_id, line.quantity).await {
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

    async fn deduct_transactional(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let first = lines.first().map(|l| l.option_id).unwrap_or(OptionId::new(0));
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BulkDeductionError::rejected(first, map_sqlx_error("begin_transaction", e)))?;

        let mut records = Vec::with_capacity(lines.len());
        for line in lines {
            match conditional_deduct(&mut *tx, line.option_id, line.quantity).await {
                Ok(record) => records.push(record),
                Err(source) => {
                    if let Err(e) = tx.rollback().await {
                        // Dropping the connection aborts the transaction anyway.
                        warn!(error = %e, "rollback after failed bulk line did not complete");
                    }
                    return Err(BulkDeductionError::rejected(line.option_id, source));
                }
            }
        }

        tx.commit().await.map_err(|e| {
            let last = lines.last().map(|l| l.option_id).unwrap_or(first);
            BulkDeductionError::rejected(last, map_sqlx_error("commit_transaction", e))
        })?;
        Ok(records)
    }
}

/// One conditional update plus, on zero rows, the disambiguating read.
async fn conditional_deduct(
    conn: &mut PgConnection,
    option_id: OptionId,
    quantity: i64,
) -> Result<DeductionRecord, StockStoreError> {
    validate_quantity(quantity).map_err(|e| StockStoreError::from_domain(option_id, e))?;

    let updated = sqlx::query(
        r#"
        UPDATE inventory_stock
        SET quantity = quantity - $2,
            version = version + 1,
            updated_at = NOW()
        WHERE option_id = $1 AND quantity >= $2
        RETURNING quantity
        "#,
    )
    .bind(option_id.get())
    .bind(quantity)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("deduct", e))?;

    if let Some(row) = updated {
        let current: i64 = row
            .try_get("quantity")
            .map_err(|e| map_sqlx_error("deduct_read_quantity", e))?;
        return Ok(DeductionRecord::from_new_balance(option_id, quantity, current));
    }

    let existing = sqlx::query("SELECT quantity FROM inventory_stock WHERE option_id = $1")
        .bind(option_id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("deduct_disambiguate", e))?;

    match existing {
        None => Err(StockStoreError::OptionNotFound(option_id)),
        Some(row) => {
            let available: i64 = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("deduct_disambiguate", e))?;
            Err(StockStoreError::InsufficientStock {
                option_id,
                requested: quantity,
                available,
            })
        }
    }
}

fn version_to_column(option_id: OptionId, version: u64) -> Result<i64, StockStoreError> {
    i64::try_from(version).map_err(|_| {
        StockStoreError::InvalidQuantity(format!("option {option_id}: version {version} exceeds BIGINT"))
    })
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self, item), fields(option_id = %item.option_id()))]
    async fn create_item(&self, item: InventoryItem) -> Result<(), StockStoreError> {
        let version = version_to_column(item.option_id(), item.version())?;
        sqlx::query(
            r#"
            INSERT INTO inventory_stock (option_id, product_id, quantity, is_available, version)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(item.option_id().get())
        .bind(item.product_id().get())
        .bind(item.quantity())
        .bind(item.is_available())
        .bind(version)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StockStoreError::AlreadyExists(item.option_id())
            } else {
                map_sqlx_error("create_item", e)
            }
        })?;
        Ok(())
    }

    async fn get_item(&self, option_id: OptionId) -> Result<Option<InventoryItem>, StockStoreError> {
        let row = sqlx::query(
            r#"
            SELECT option_id, product_id, quantity, is_available, version
            FROM inventory_stock
            WHERE option_id = $1
            "#,
        )
        .bind(option_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;

        match row {
            Some(row) => {
                let row = InventoryRow::from_row(&row).map_err(|e| map_sqlx_error("get_item", e))?;
                Ok(Some(row.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self),
        fields(option_id = %option_id, current_stock = field::Empty)
    )]
    async fn deduct(&self, option_id: OptionId, quantity: i64) -> Result<DeductionRecord, StockStoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        let record = conditional_deduct(&mut *conn, option_id, quantity).await?;
        Span::current().record("current_stock", record.current_stock);
        Ok(record)
    }

    #[instrument(skip(self, lines), fields(lines = lines.len(), mode = ?self.bulk_mode))]
    async fn deduct_bulk(&self, lines: &[StockLine]) -> Result<Vec<DeductionRecord>, BulkDeductionError> {
        let sorted = prepare_batch(lines)?;
        if sorted.is_empty() {
            return Ok(Vec::new());
        }
        match self.bulk_mode {
            BulkMode::Sequential => self.deduct_sequential(&sorted).await,
            BulkMode::Transactional => self.deduct_transactional(&sorted).await,
        }
    }

    #[instrument(
        skip(self),
        fields(option_id = %option_id, current_stock = field::Empty)
    )]
    async fn restore(&self, option_id: OptionId, quantity: i64) -> Result<RestorationRecord, StockStoreError> {
        validate_quantity(quantity).map_err(|e| StockStoreError::from_domain(option_id, e))?;

        let row = sqlx::query(
            r#"
            UPDATE inventory_stock
            SET quantity = quantity + $2,
                version = version + 1,
                updated_at = NOW()
            WHERE option_id = $1
            RETURNING quantity
            "#,
        )
        .bind(option_id.get())
        .bind(quantity)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("restore", e))?
        .ok_or(StockStoreError::OptionNotFound(option_id))?;

        let current: i64 = row
            .try_get("quantity")
            .map_err(|e| map_sqlx_error("restore_read_quantity", e))?;
        Span::current().record("current_stock", current);
        Ok(RestorationRecord::from_new_balance(option_id, quantity, current))
    }
}

/// Map SQLx errors to StockStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StockStoreError::Conflict(msg),
                // Check constraint violation (quantity >= 0)
                Some("23514") => StockStoreError::InvalidQuantity(msg),
                // Numeric value out of range (BIGINT overflow)
                Some("22003") => StockStoreError::InvalidQuantity(msg),
                _ => StockStoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StockStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StockStoreError::Unavailable(format!("timed out waiting for a connection in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            // fetch_optional never yields this; kept for completeness.
            StockStoreError::Unavailable(format!("unexpected row not found in {operation}"))
        }
        _ => StockStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct InventoryRow {
    option_id: i64,
    product_id: i64,
    quantity: i64,
    is_available: bool,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            option_id: row.try_get("option_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            is_available: row.try_get("is_available")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<InventoryRow> for InventoryItem {
    type Error = StockStoreError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        let option_id = OptionId::new(row.option_id);
        let stock = StockCount::new(row.quantity)
            .map_err(|e| StockStoreError::from_domain(option_id, e))?;
        let version = u64::try_from(row.version).map_err(|_| {
            StockStoreError::InvalidQuantity(format!("option {option_id}: negative version {}", row.version))
        })?;
        Ok(InventoryItem::from_parts(
            option_id,
            ProductId::new(row.product_id),
            stock,
            row.is_available,
            version,
        ))
    }
}
