//! Data models for the store layer.

pub mod backend;
pub mod health;
pub mod query;

pub use backend::{
    BackendDescriptor, BackendKind, ConnectionParams, ConnectionState, ConnectionStatus,
    PlaceholderStyle, StateTransition,
};
pub use health::{
    HealthRecord, HealthReport, InitReport, OverallStatus, PoolStatus, ProbeOutcome, ProbeStatus,
};
pub use query::{ColumnMetadata, ExecuteResult, QueryParam, QueryRequest, QueryResult};
