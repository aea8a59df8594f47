//! Data models for the database access core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionConfigError, ConnectionInfo, ConnectionSummary, DatabaseType,
    HealthStatus,
};
pub use query::{
    BatchResult, ColumnMetadata, IsolationLevel, QueryOptions, QueryParam, QueryRequest,
    QueryResult, RowSet, TransactionOptions, TransactionResult, TransactionStatement,
    UpdateResult,
};
pub use schema::{
    ColumnDefinition, ForeignKey, ForeignKeyAction, IndexInfo, TableInfo, TableSchema, TableType,
};
