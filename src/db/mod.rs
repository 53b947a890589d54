//! Relational database abstraction layer.
//!
//! This module provides the SQL side of the store:
//! - Placeholder translation and result normalization
//! - Engine-specific connection pooling
//! - Query execution
//! - Transaction coordination
//! - Type mappings

pub mod adapter;
pub mod executor;
pub mod pool;
pub mod transaction;
pub mod types;

pub use adapter::{TranslatedQuery, translate};
pub use pool::{ConnectionHandle, EnginePool, RelationalPool};
pub use transaction::{TransactionCoordinator, TxHandle};
