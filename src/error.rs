//! Error types for the database access core.
//!
//! Every failure surfaced by the registry, validator, executor, coordinator
//! or introspector is a [`DbError`]. Driver errors are classified once, in the
//! `From<sqlx::Error>` impl, so callers can match on the variant (or on
//! [`DbError::code`]) without inspecting driver-specific messages.

use crate::db::validator::ValidationRule;
use serde::Serialize;
use thiserror::Error;

/// Kind of integrity constraint that rejected a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unique => write!(f, "unique"),
            Self::ForeignKey => write!(f, "foreign key"),
            Self::NotNull => write!(f, "not null"),
            Self::Check => write!(f, "check"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Connection '{connection_id}' already exists")]
    DuplicateConnection { connection_id: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid connection configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Connection pool '{connection_id}' exhausted: no connection available after {waited_ms}ms")]
    PoolExhausted {
        connection_id: String,
        waited_ms: u64,
    },

    #[error("Security validation failed: {rule}")]
    SecurityValidation { rule: ValidationRule },

    #[error("SQL syntax error: {message}")]
    Syntax {
        message: String,
        sql_state: Option<String>,
    },

    #[error("{kind} constraint violated{}: {message}", constraint.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    ConstraintViolation {
        kind: ConstraintKind,
        /// Name of the violated constraint, when the driver exposes it
        constraint: Option<String>,
        message: String,
    },

    #[error("Table not found: {}", qualified(schema.as_deref(), table))]
    TableNotFound {
        table: String,
        schema: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Batch failed at entry {failed_index} after {} completed: {source}", completed.len())]
    BatchFailed {
        failed_index: usize,
        /// Affected-row counts of the entries applied before the failure
        completed: Vec<u64>,
        source: Box<DbError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Execution failed: {message}")]
    UnknownExecution {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn qualified(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{table}"),
        None => table.to_string(),
    }
}

impl DbError {
    /// Create a connection not found error.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    /// Create a duplicate connection error.
    pub fn duplicate_connection(connection_id: impl Into<String>) -> Self {
        Self::DuplicateConnection {
            connection_id: connection_id.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn pool_exhausted(connection_id: impl Into<String>, waited_ms: u64) -> Self {
        Self::PoolExhausted {
            connection_id: connection_id.into(),
            waited_ms,
        }
    }

    /// Create a validation error for the rule that rejected the statement.
    pub fn security(rule: ValidationRule) -> Self {
        Self::SecurityValidation { rule }
    }

    pub fn table_not_found(table: impl Into<String>, schema: Option<&str>) -> Self {
        Self::TableNotFound {
            table: table.into(),
            schema: schema.map(String::from),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable, driver-independent error code for the protocol layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionNotFound { .. } => "CONNECTION_NOT_FOUND",
            Self::DuplicateConnection { .. } => "DUPLICATE_CONNECTION",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::SecurityValidation { .. } => "SECURITY_VALIDATION",
            Self::Syntax { .. } => "SYNTAX_ERROR",
            Self::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Self::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::BatchFailed { .. } => "BATCH_FAILED",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::UnknownExecution { .. } => "UNKNOWN_EXECUTION",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::DuplicateConnection { .. } => {
                Some("Remove the existing connection first or use a different connection ID")
            }
            Self::PoolExhausted { .. } => {
                Some("Increase max_pool_size or the acquire timeout, or retry later")
            }
            Self::Timeout { .. } => {
                Some("Consider increasing the timeout or optimizing the statement")
            }
            Self::Syntax { .. } => Some("Check the SQL syntax for the target database"),
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry the operation.
    ///
    /// Advisory only: nothing in this crate re-executes a failed statement.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => classify_database_error(db_err.as_ref()),
            sqlx::Error::Configuration(msg) => DbError::invalid_config(msg.to_string()),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted("unknown", 0),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Re-add the connection")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::RowNotFound => DbError::UnknownExecution {
                message: "No rows returned".to_string(),
                sql_state: None,
            },
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::UnknownExecution {
                message: other.to_string(),
                sql_state: None,
            },
        }
    }
}

/// Map a driver-reported database error onto the taxonomy.
fn classify_database_error(db_err: &dyn sqlx::error::DatabaseError) -> DbError {
    use sqlx::error::ErrorKind;

    let message = db_err.message().to_string();
    let code = db_err.code().map(|c| c.to_string());

    let constraint_kind = match db_err.kind() {
        ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
        ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
        ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
        ErrorKind::CheckViolation => Some(ConstraintKind::Check),
        _ => None,
    };
    if let Some(kind) = constraint_kind {
        let constraint = db_err
            .constraint()
            .map(String::from)
            .or_else(|| extract_constraint_name(&message));
        return DbError::ConstraintViolation {
            kind,
            constraint,
            message,
        };
    }

    if is_syntax_error(code.as_deref(), &message) {
        return DbError::Syntax {
            message,
            sql_state: code,
        };
    }

    if let Some(table) = missing_table(code.as_deref(), &message) {
        return DbError::TableNotFound {
            table,
            schema: None,
        };
    }

    DbError::UnknownExecution {
        message,
        sql_state: code,
    }
}

fn is_syntax_error(code: Option<&str>, message: &str) -> bool {
    let lower = message.to_lowercase();
    // 42601: PostgreSQL syntax_error. MySQL reports 42000 for several classes,
    // so it is matched by message instead.
    code == Some("42601")
        || lower.contains("syntax error")
        || lower.contains("error in your sql syntax")
}

fn missing_table(code: Option<&str>, message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    let matched = matches!(code, Some("42P01") | Some("42S02"))
        || lower.contains("no such table")
        || (lower.contains("table") && lower.contains("doesn't exist"));
    if !matched {
        return None;
    }

    // sqlite: "no such table: users"
    if let Some(rest) = message.split("no such table:").nth(1) {
        return Some(rest.trim().to_string());
    }
    // postgres: relation "users" does not exist / mysql: Table 'db.users' doesn't exist
    Some(first_quoted(message).unwrap_or_else(|| "unknown".to_string()))
}

/// Pull a constraint name out of a driver message when the driver does not
/// expose it structurally.
///
/// - SQLite: `UNIQUE constraint failed: users.email`
/// - MySQL: `Duplicate entry 'a' for key 'users.email'`
/// - MySQL FK: `... CONSTRAINT `fk_orders_user` FOREIGN KEY ...`
pub(crate) fn extract_constraint_name(message: &str) -> Option<String> {
    if let Some(rest) = message.split("constraint failed:").nth(1) {
        let name = rest.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    if let Some(rest) = message.split("for key ").nth(1) {
        return first_quoted(rest);
    }
    if let Some(rest) = message.split("CONSTRAINT ").nth(1) {
        return first_quoted(rest);
    }
    None
}

/// Text between the first pair of matching quote characters (`'`, `"` or `` ` ``).
fn first_quoted(s: &str) -> Option<String> {
    let start = s.find(['\'', '"', '`'])?;
    let quote = s[start..].chars().next()?;
    let rest = &s[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
