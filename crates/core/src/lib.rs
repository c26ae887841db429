//! `stockguard-core`: shared building blocks for the inventory core.
//!
//! This crate contains **pure** primitives (no storage or runtime concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{OptionId, OrderId, ProductId};
pub use value_object::ValueObject;
