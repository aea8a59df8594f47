//! Query-related data models.
//!
//! This module defines types for SQL query requests and results, including
//! the transaction request/result shapes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// A parameter value for parameterized queries.
///
/// Serialized with an explicit type tag so that decimals and timestamps are
/// not confused with plain strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryParam {
    /// Bound as SQL NULL
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Exact numeric
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

/// Loose JSON input from a protocol layer: numbers become `Int` when they fit
/// an i64, arrays and objects are bound as JSON.
impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Decimal> for QueryParam {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Statement timeout; the connection or registry default when unset
    pub timeout: Option<Duration>,
    /// Row cap for `execute_with_limit`
    pub fetch_size: Option<u32>,
    /// Render UTF-8 binary columns as text instead of base64
    #[serde(default)]
    pub decode_binary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl QueryRequest {
    /// Create a new query request with default options.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.options.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_decode_binary(mut self, decode_binary: bool) -> Self {
        self.options.decode_binary = decode_binary;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "INT8", "VARCHAR", "TEXT")
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Rows produced by a row-returning statement.
///
/// `columns` and the keys of every row agree in number and order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// True when a row cap cut the result short
    pub has_more: bool,
    pub execution_time_ms: u64,
}

impl RowSet {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Outcome of a data-modifying statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub affected_rows: u64,
    /// Rows from RETURNING, or `{"generated_key": n}` for auto-increment inserts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_keys: Vec<serde_json::Map<String, JsonValue>>,
    pub execution_time_ms: u64,
}

/// Outcome of a batch: one entry per parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Sum of `entries`
    pub affected_rows: u64,
    pub entries: Vec<u64>,
    pub execution_time_ms: u64,
}

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    Rows(RowSet),
    Update(UpdateResult),
    Batch(BatchResult),
}

impl QueryResult {
    pub fn execution_time_ms(&self) -> u64 {
        match self {
            Self::Rows(r) => r.execution_time_ms,
            Self::Update(u) => u.execution_time_ms,
            Self::Batch(b) => b.execution_time_ms,
        }
    }

    /// Affected rows for mutations; `None` for row sets.
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            Self::Rows(_) => None,
            Self::Update(u) => Some(u.affected_rows),
            Self::Batch(b) => Some(b.affected_rows),
        }
    }

    pub fn as_rows(&self) -> Option<&RowSet> {
        match self {
            Self::Rows(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_update(&self) -> Option<&UpdateResult> {
        match self {
            Self::Update(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_batch(&self) -> Option<&BatchResult> {
        match self {
            Self::Batch(b) => Some(b),
            _ => None,
        }
    }

    /// Number of rows returned or affected.
    pub fn row_count(&self) -> u64 {
        match self {
            Self::Rows(r) => r.rows.len() as u64,
            Self::Update(u) => u.affected_rows,
            Self::Batch(b) => b.affected_rows,
        }
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl TransactionStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Deadline for the whole unit, commit included
    pub timeout: Option<Duration>,
    /// Database default when unset
    pub isolation: Option<IsolationLevel>,
}

impl TransactionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }
}

/// Outcome of a committed transaction.
///
/// Only produced on commit: a failed transaction surfaces its error instead,
/// so no partial counts are ever reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    pub statement_count: usize,
    pub affected_rows: u64,
    pub results: Vec<QueryResult>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(7)), QueryParam::Int(7));
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from(json!(null)), QueryParam::Null);
        assert_eq!(QueryParam::from(json!(3)), QueryParam::Int(3));
        assert_eq!(QueryParam::from(json!(2.5)), QueryParam::Float(2.5));
        assert_eq!(
            QueryParam::from(json!("null")),
            QueryParam::String("null".to_string())
        );
        assert_eq!(
            QueryParam::from(json!({"a": 1})),
            QueryParam::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_query_param_tagged_serde() {
        let param = QueryParam::Decimal("12.50".parse().unwrap());
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json, json!({"type": "decimal", "value": "12.50"}));

        let bytes: QueryParam =
            serde_json::from_value(json!({"type": "bytes", "value": "aGk="})).unwrap();
        assert_eq!(bytes, QueryParam::Bytes(b"hi".to_vec()));
    }

    #[test]
    fn test_query_request_builder() {
        let req = QueryRequest::new("SELECT * FROM users WHERE id = ?")
            .with_param(1)
            .with_fetch_size(50)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(req.params, vec![QueryParam::Int(1)]);
        assert_eq!(req.options.fetch_size, Some(50));
        assert_eq!(req.options.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_query_result_tagged() {
        let result = QueryResult::Update(UpdateResult {
            affected_rows: 2,
            generated_keys: Vec::new(),
            execution_time_ms: 3,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "update");
        assert_eq!(json["affected_rows"], 2);
        assert_eq!(result.affected_rows(), Some(2));
        assert!(result.as_rows().is_none());
    }

    #[test]
    fn test_row_set_affected_rows_unset() {
        let result = QueryResult::Rows(RowSet {
            columns: vec![ColumnMetadata::new("x", "INTEGER")],
            rows: Vec::new(),
            has_more: false,
            execution_time_ms: 1,
        });
        assert_eq!(result.affected_rows(), None);
        assert_eq!(result.as_rows().unwrap().column_names(), vec!["x"]);
    }

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(
            serde_json::to_value(IsolationLevel::ReadCommitted).unwrap(),
            json!("read_committed")
        );
    }
}
