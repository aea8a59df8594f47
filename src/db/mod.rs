//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection registry with bounded pools and RAII leases
//! - Statement validation
//! - Query execution with timeouts and row caps
//! - Cancellation of statements that overrun their deadline
//! - Atomic multi-statement transactions
//! - Schema introspection
//! - Type mappings and parameter binding
//! - Database dispatch macros for reducing code duplication

pub(crate) mod cancel;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod schema;
pub mod sink;
pub mod transaction;
pub mod types;
pub mod validator;

pub use executor::{GENERATED_KEY, QueryExecutor};
pub use pool::{ConnectionLease, ConnectionPolicy, ConnectionRegistry, DbPool, LeasedConnection};
pub use schema::SchemaIntrospector;
pub use sink::{StatementEvent, StatementOutcome, StatementSink, TracingSink};
pub use transaction::TransactionCoordinator;
pub use validator::{
    Keyword, QueryValidator, ValidatedStatement, ValidationMode, ValidationRule, Verb,
};
