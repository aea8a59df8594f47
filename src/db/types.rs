//! Row decoding.
//!
//! Values are converted to JSON in two steps:
//! 1. `TypeCategory` classifies the column's declared type
//! 2. a backend-specific decoder pulls the value out of the row
//!
//! SQLite is dynamically typed, so its decoder looks at the storage class of
//! each value and only uses the declared type as a hint (booleans, JSON and
//! timestamps).

use crate::models::{ColumnMetadata, DatabaseType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// A decoded row, keyed by column label in select order.
pub type JsonRow = serde_json::Map<String, JsonValue>;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    /// Timestamp without time zone
    Timestamp,
    /// Timestamp with time zone, normalized to UTC
    TimestampTz,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("json") {
        return TypeCategory::Json;
    }
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Decimal/Numeric before integers: "numeric" is not an int, but sqlite
    // gives it numeric affinity which stores floats
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Temporal types. MySQL TIMESTAMP is stored in UTC; DATETIME is not.
    if lower == "timestamptz"
        || lower.contains("with time zone")
        || (db == DatabaseType::MySQL && lower == "timestamp")
    {
        return TypeCategory::TimestampTz;
    }
    if lower.starts_with("timestamp") || lower.starts_with("datetime") {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" || lower.starts_with("time without") {
        return TypeCategory::Time;
    }

    // "interval" and "point" contain "int"
    if lower.contains("interval") || lower.contains("point") {
        return TypeCategory::Unknown;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char")
        || lower.contains("text")
        || lower == "name"
        || lower == "enum"
        || lower == "set"
        || lower == "citext"
    {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// DECIMAL/NUMERIC as the server's own text, for values that do not fit
/// `rust_decimal` or arrive in text format.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Value Encoding
// =============================================================================

/// Binary column to JSON.
///
/// With `decode_binary`, valid UTF-8 is returned as text; everything else
/// is base64.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn timestamptz_value(v: DateTime<Utc>) -> JsonValue {
    JsonValue::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn timestamp_value(v: NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn date_value(v: NaiveDate) -> JsonValue {
    JsonValue::String(v.to_string())
}

fn time_value(v: NaiveTime) -> JsonValue {
    JsonValue::String(v.to_string())
}

fn is_null<R: Row>(row: &R, idx: usize) -> bool
where
    usize: ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

// =============================================================================
// Column Labels
// =============================================================================

/// Column metadata for a row or a described statement.
pub fn column_metadata<C: Column>(columns: &[C]) -> Vec<ColumnMetadata> {
    let mut meta: Vec<ColumnMetadata> = columns
        .iter()
        .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
        .collect();
    disambiguate_labels(&mut meta);
    meta
}

/// Rename repeated labels (`id`, `id` -> `id`, `id_2`) so each row map keeps
/// one key per column.
pub fn disambiguate_labels(columns: &mut [ColumnMetadata]) {
    let mut seen = std::collections::HashSet::new();
    for col in columns.iter_mut() {
        if seen.insert(col.name.clone()) {
            continue;
        }
        let mut n = 2;
        let label = loop {
            let candidate = format!("{}_{}", col.name, n);
            if !seen.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        seen.insert(label.clone());
        col.name = label;
    }
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Conversion of backend rows to JSON maps.
pub trait RowToJson {
    /// Columns with labels already disambiguated.
    fn column_metadata(&self) -> Vec<ColumnMetadata>;

    fn decode_column(&self, idx: usize, decode_binary: bool) -> JsonValue;

    /// Decode every column under the labels in `columns`.
    fn to_json_map(&self, columns: &[ColumnMetadata], decode_binary: bool) -> JsonRow {
        columns
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name.clone(), self.decode_column(idx, decode_binary)))
            .collect()
    }
}

impl RowToJson for MySqlRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self.columns())
    }

    fn decode_column(&self, idx: usize, decode_binary: bool) -> JsonValue {
        let type_name = self.columns()[idx].type_info().name();
        let category = categorize_type(type_name, DatabaseType::MySQL);
        mysql::decode_column(self, idx, category, decode_binary)
    }
}

impl RowToJson for PgRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self.columns())
    }

    fn decode_column(&self, idx: usize, decode_binary: bool) -> JsonValue {
        let type_name = self.columns()[idx].type_info().name();
        let category = categorize_type(type_name, DatabaseType::PostgreSQL);
        postgres::decode_column(self, idx, type_name, category, decode_binary)
    }
}

impl RowToJson for SqliteRow {
    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        column_metadata(self.columns())
    }

    fn decode_column(&self, idx: usize, decode_binary: bool) -> JsonValue {
        let type_name = self.columns()[idx].type_info().name();
        let category = categorize_type(type_name, DatabaseType::SQLite);
        sqlite::decode_column(self, idx, category, decode_binary)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        if is_null(row, idx) {
            return JsonValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::TimestampTz => row
                .try_get::<DateTime<Utc>, _>(idx)
                .map(timestamptz_value)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::Timestamp => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(timestamp_value)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .map(date_value)
                .unwrap_or_else(|_| decode_text(row, idx)),
            // negative or >24h TIME values do not fit NaiveTime
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .map(time_value)
                .unwrap_or_else(|_| decode_text(row, idx)),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => JsonValue::String(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        decode_text(row, idx)
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<bool, _>(idx)
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<JsonValue, _>(idx)
            .unwrap_or_else(|_| decode_text(row, idx))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<String, _>(idx) {
            Ok(v) => JsonValue::String(v),
            Err(e) => {
                tracing::debug!(column = idx, error = %e, "Undecodable MySQL column");
                JsonValue::Null
            }
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        if is_null(row, idx) {
            return JsonValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| decode_binary_value(&v, decode_binary))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<JsonValue, _>(idx)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => row
                .try_get::<uuid::Uuid, _>(idx)
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::TimestampTz => row
                .try_get::<DateTime<Utc>, _>(idx)
                .map(timestamptz_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Timestamp => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(timestamp_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .map(date_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .map(time_value)
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<rust_decimal::Decimal, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => JsonValue::String(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<sqlx::postgres::types::Oid, _>(idx) {
            return JsonValue::Number(v.0.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        match row.try_get::<String, _>(idx) {
            Ok(v) => JsonValue::String(v),
            Err(_) => {
                tracing::debug!(column = idx, type_name, "Unsupported PostgreSQL type");
                JsonValue::Null
            }
        }
    }
}

mod sqlite {
    use super::*;

    /// SQLite storage classes as reported for a single value.
    const INTEGER: &str = "INTEGER";
    const REAL: &str = "REAL";
    const BLOB: &str = "BLOB";

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to read SQLite value");
                return JsonValue::Null;
            }
        };

        match storage.as_str() {
            INTEGER => match row.try_get_unchecked::<i64, _>(idx) {
                Ok(v) if category == TypeCategory::Boolean => JsonValue::Bool(v != 0),
                Ok(v) => JsonValue::Number(v.into()),
                Err(_) => JsonValue::Null,
            },
            REAL => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            BLOB => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| decode_binary_value(&v, decode_binary))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, category),
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let Ok(v) = row.try_get_unchecked::<String, _>(idx) else {
            return JsonValue::Null;
        };
        match category {
            TypeCategory::Json => serde_json::from_str(&v).unwrap_or(JsonValue::String(v)),
            TypeCategory::TimestampTz | TypeCategory::Timestamp => {
                match row.try_get_unchecked::<DateTime<Utc>, _>(idx) {
                    Ok(ts) if has_offset(&v) => timestamptz_value(ts),
                    _ => JsonValue::String(v),
                }
            }
            _ => JsonValue::String(v),
        }
    }

    /// Text timestamps written with an explicit offset or `Z`.
    fn has_offset(s: &str) -> bool {
        s.ends_with('Z') || s.rfind(['+', '-']).is_some_and(|i| i > 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_not_integer() {
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
        assert_eq!(
            categorize_type("DECIMAL(10,2)", DatabaseType::SQLite),
            TypeCategory::Decimal
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("TIMESTAMP", DatabaseType::PostgreSQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMP", DatabaseType::MySQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::PostgreSQL),
            TypeCategory::Date
        );
        assert_eq!(
            categorize_type("TIME", DatabaseType::MySQL),
            TypeCategory::Time
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("UUID", DatabaseType::PostgreSQL),
            TypeCategory::Uuid
        );
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::SQLite),
            TypeCategory::Boolean
        );
        assert_eq!(
            categorize_type("BYTEA", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("DOUBLE PRECISION", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_disambiguate_labels() {
        let mut cols = vec![
            ColumnMetadata::new("id", "INT4"),
            ColumnMetadata::new("id", "INT4"),
            ColumnMetadata::new("id_2", "TEXT"),
            ColumnMetadata::new("id", "INT4"),
        ];
        disambiguate_labels(&mut cols);
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "id_3", "id_2", "id_4"]);
    }

    #[test]
    fn test_disambiguate_labels_unique_untouched() {
        let mut cols = vec![ColumnMetadata::new("a", "TEXT"), ColumnMetadata::new("b", "TEXT")];
        disambiguate_labels(&mut cols);
        assert_eq!(cols[0].name, "a");
        assert_eq!(cols[1].name, "b");
    }

    #[test]
    fn test_decode_binary_value_with_valid_utf8() {
        let bytes = b"hello world";
        assert_eq!(decode_binary_value(bytes, true), JsonValue::from("hello world"));
        assert_eq!(
            decode_binary_value(bytes, false),
            JsonValue::from("aGVsbG8gd29ybGQ=")
        );
    }

    #[test]
    fn test_decode_binary_value_with_invalid_utf8() {
        let bytes: &[u8] = &[0xFF, 0xFE, 0x00, 0x01];
        assert_eq!(decode_binary_value(bytes, true), JsonValue::from("//4AAQ=="));
        assert_eq!(decode_binary_value(bytes, false), JsonValue::from("//4AAQ=="));
    }

    #[test]
    fn test_temporal_formatting() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:30:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamptz_value(ts), JsonValue::from("2024-03-01T10:30:00Z"));

        let naive = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(8, 0, 5, 250)
            .unwrap();
        assert_eq!(timestamp_value(naive), JsonValue::from("2024-03-01T08:00:05.250"));
    }

    #[test]
    fn test_float_value_non_finite() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::from("NaN"));
    }
}
