//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only deterministic, value-level failures live here (bad magnitudes, a
/// balance that cannot cover a request). Storage concerns such as a missing
/// row or an unreachable database belong to the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A stock quantity was negative (or otherwise not representable).
    #[error("invalid stock quantity: {0}")]
    InvalidStock(i64),

    /// An operation argument was rejected (e.g. a non-positive amount).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The balance cannot cover the requested amount.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn insufficient(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }
}
