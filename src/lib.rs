//! DB Access Core Library
//!
//! Pooled, validated access to SQL databases (SQLite, PostgreSQL, MySQL):
//! a connection registry, a statement validator, a query executor, a
//! transaction coordinator and a schema introspector. Every operation returns
//! structured results or a typed [`DbError`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolOptions, SecurityConfig};
pub use db::{
    ConnectionLease, ConnectionRegistry, QueryExecutor, QueryValidator, SchemaIntrospector,
    StatementSink, TracingSink, TransactionCoordinator,
};
pub use error::{DbError, DbResult};
