//! Transient results handed back to callers for audit and logging.
//!
//! None of these are persisted by the inventory core.

use serde::{Deserialize, Serialize};

use stockguard_core::OptionId;

/// One `(option, quantity)` line of a bulk request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLine {
    pub option_id: OptionId,
    pub quantity: i64,
}

impl StockLine {
    pub fn new(option_id: OptionId, quantity: i64) -> Self {
        Self {
            option_id,
            quantity,
        }
    }
}

/// Outcome of a successful deduction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionRecord {
    pub option_id: OptionId,
    pub previous_stock: i64,
    pub deducted_quantity: i64,
    pub current_stock: i64,
}

impl DeductionRecord {
    /// Build from the balance observed right after the write.
    pub fn from_new_balance(option_id: OptionId, deducted_quantity: i64, current_stock: i64) -> Self {
        Self {
            option_id,
            previous_stock: current_stock + deducted_quantity,
            deducted_quantity,
            current_stock,
        }
    }
}

/// Outcome of a successful restoration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationRecord {
    pub option_id: OptionId,
    pub previous_stock: i64,
    pub restored_quantity: i64,
    pub current_stock: i64,
}

impl RestorationRecord {
    pub fn from_new_balance(option_id: OptionId, restored_quantity: i64, current_stock: i64) -> Self {
        Self {
            option_id,
            previous_stock: current_stock - restored_quantity,
            restored_quantity,
            current_stock,
        }
    }
}

/// Read-only availability answer for a prospective purchase.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStatus {
    pub option_id: OptionId,
    pub current_stock: i64,
    pub requested_quantity: i64,
    pub is_available: bool,
}
