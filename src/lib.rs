//! datalink - multi-backend data-store connection layer.
//!
//! Establishes, pools, monitors, and gracefully degrades connections to
//! two interchangeable relational engines (PostgreSQL and MySQL) plus an
//! independent document store (MongoDB), behind one uniform
//! query/transaction/health contract.
//!
//! # Example
//!
//! ```rust,ignore
//! use datalink::{ConnectionManager, QueryParam};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = Arc::new(ConnectionManager::from_env());
//!     let report = manager.initialize().await;
//!     assert!(report.overall);
//!
//!     let result = manager
//!         .query("SELECT name FROM users WHERE id = ?", &[QueryParam::Int(7)])
//!         .await
//!         .unwrap();
//!     println!("{} row(s)", result.row_count);
//!
//!     let health = manager.health_check().await;
//!     println!("{:?}", health.status);
//!
//!     manager.shutdown().await;
//! }
//! ```

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod health;
pub mod manager;
pub mod models;

pub use config::ConfigResolver;
pub use document::DocumentStore;
pub use error::{QueryErrorKind, StoreError, StoreResult};
pub use health::HealthMonitor;
pub use manager::ConnectionManager;
pub use models::{
    BackendDescriptor, BackendKind, ConnectionStatus, HealthReport, InitReport, PlaceholderStyle,
    PoolStatus, QueryParam, QueryRequest, QueryResult,
};
