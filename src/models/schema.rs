//! Schema-related data models.
//!
//! Read-only descriptions produced by the schema introspector. None of these
//! are mutated after construction.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Table listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub table_type: TableType,
    /// Catalog estimate; exact only for SQLite
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
    MaterializedView,
    ForeignTable,
    TemporaryTable,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "view" | "system view" | "v" => Self::View,
            "materialized view" | "matview" | "m" => Self::MaterializedView,
            "foreign table" | "foreign" | "f" => Self::ForeignTable,
            "local temporary" | "temporary" | "temp" => Self::TemporaryTable,
            // "table", "base table", "r", "p", anything unknown
            _ => Self::Table,
        }
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::MaterializedView => write!(f, "materialized_view"),
            Self::ForeignTable => write!(f, "foreign_table"),
            Self::TemporaryTable => write!(f, "temporary_table"),
        }
    }
}

/// Full description of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub schema_name: String,
    pub table_type: TableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    /// Primary key columns in key order
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get the fully qualified table name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// 1-based position in the table
    pub ordinal_position: u32,
    /// Full type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub nullable: bool,
    /// Default value with appropriate JSON type based on column data type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    pub is_primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    pub fn new(
        name: impl Into<String>,
        ordinal_position: u32,
        data_type: impl Into<String>,
        nullable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal_position,
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
            comment: None,
        }
    }

    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    /// Set the default from its catalog text, typed by the column's data type.
    pub fn with_default_str(mut self, default_str: Option<&str>) -> Self {
        self.default_value = default_str.map(|d| parse_default_value(d, &self.data_type));
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment.filter(|c| !c.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name; SQLite does not name foreign keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

/// Foreign key referential action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Parse from database-specific string.
    ///
    /// Accepts the information_schema spelling (`SET NULL`) as well as the
    /// single-letter PostgreSQL catalog codes (`a`, `r`, `c`, `n`, `d`).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "CASCADE" | "C" => Self::Cascade,
            "SET NULL" | "N" => Self::SetNull,
            "SET DEFAULT" | "D" => Self::SetDefault,
            "RESTRICT" | "R" => Self::Restrict,
            _ => Self::NoAction,
        }
    }
}

impl std::fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAction => write!(f, "NO ACTION"),
            Self::Restrict => write!(f, "RESTRICT"),
            Self::Cascade => write!(f, "CASCADE"),
            Self::SetNull => write!(f, "SET NULL"),
            Self::SetDefault => write!(f, "SET DEFAULT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed columns in key order
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// BTREE, HASH, FULLTEXT, GIN, GIST, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_algorithm: Option<String>,
}

/// Parse a catalog default into a JSON value typed by the column's data type.
///
/// Quoted literals are unquoted, and PostgreSQL casts (`'x'::text`) are
/// dropped. Expressions such as `CURRENT_TIMESTAMP` or `nextval(...)` stay
/// strings, as do decimals (to keep their precision).
pub fn parse_default_value(default_str: &str, data_type: &str) -> JsonValue {
    let dt_lower = data_type.to_lowercase();
    let literal = unquote_literal(default_str.trim());

    let Some(literal) = literal else {
        // Not a plain literal: numbers, booleans or expressions
        let raw = default_str.trim();
        if raw.eq_ignore_ascii_case("null") {
            return JsonValue::Null;
        }
        if dt_lower.contains("int") || dt_lower.contains("serial") {
            if let Ok(n) = raw.parse::<i64>() {
                return JsonValue::Number(n.into());
            }
        }
        if (dt_lower.contains("float") || dt_lower.contains("double") || dt_lower == "real")
            && !dt_lower.contains("decimal")
            && !dt_lower.contains("numeric")
        {
            if let Some(num) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                return JsonValue::Number(num);
            }
        }
        if dt_lower.contains("bool") {
            match raw.to_lowercase().as_str() {
                "true" | "1" | "t" => return JsonValue::Bool(true),
                "false" | "0" | "f" => return JsonValue::Bool(false),
                _ => {}
            }
        }
        return JsonValue::String(raw.to_string());
    };

    if dt_lower == "json" || dt_lower == "jsonb" {
        if let Ok(parsed) = serde_json::from_str(&literal) {
            return parsed;
        }
    }
    JsonValue::String(literal)
}

/// `'it''s'::text` -> `it's`. `None` when the input is not a quoted literal.
fn unquote_literal(s: &str) -> Option<String> {
    let body = match s.rfind("::") {
        Some(idx) if s[..idx].ends_with('\'') => &s[..idx],
        _ => s,
    };
    let inner = body.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_type_parsing() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("VIEW"), TableType::View);
        assert_eq!(TableType::parse("m"), TableType::MaterializedView);
        assert_eq!(TableType::parse("LOCAL TEMPORARY"), TableType::TemporaryTable);
        assert_eq!(TableType::parse("whatever"), TableType::Table);
    }

    #[test]
    fn test_foreign_key_action_parsing() {
        assert_eq!(ForeignKeyAction::parse("CASCADE"), ForeignKeyAction::Cascade);
        assert_eq!(ForeignKeyAction::parse("set null"), ForeignKeyAction::SetNull);
        assert_eq!(ForeignKeyAction::parse("r"), ForeignKeyAction::Restrict);
        assert_eq!(ForeignKeyAction::parse("a"), ForeignKeyAction::NoAction);
        assert_eq!(ForeignKeyAction::SetDefault.to_string(), "SET DEFAULT");
    }

    #[test]
    fn test_column_definition_builder() {
        let col = ColumnDefinition::new("id", 1, "bigint", false)
            .with_primary_key(true)
            .with_default_str(Some("7"))
            .with_comment(Some(String::new()));
        assert!(col.is_primary_key);
        assert_eq!(col.default_value, Some(json!(7)));
        assert_eq!(col.comment, None);
    }

    #[test]
    fn test_table_info_serialization_without_optional_fields() {
        let table = TableInfo {
            name: "users".to_string(),
            schema: "main".to_string(),
            table_type: TableType::Table,
            row_count: None,
            comment: None,
        };
        let json = serde_json::to_string(&table).unwrap();
        assert!(!json.contains("row_count"));
        assert!(!json.contains("comment"));
        assert!(json.contains("\"table_type\":\"table\""));
    }

    #[test]
    fn test_parse_default_value_numbers() {
        assert_eq!(parse_default_value("0", "tinyint unsigned"), json!(0));
        assert_eq!(parse_default_value("-100", "bigint"), json!(-100));
        assert_eq!(parse_default_value("1.5", "float"), json!(1.5));
        // decimal/numeric stay strings
        assert_eq!(parse_default_value("99.99", "numeric(5,2)"), json!("99.99"));
    }

    #[test]
    fn test_parse_default_value_boolean() {
        assert_eq!(parse_default_value("true", "boolean"), json!(true));
        assert_eq!(parse_default_value("0", "bool"), json!(false));
    }

    #[test]
    fn test_parse_default_value_quoted_literals() {
        assert_eq!(
            parse_default_value("'pending'::character varying", "varchar"),
            json!("pending")
        );
        assert_eq!(parse_default_value("'it''s'", "text"), json!("it's"));
        assert_eq!(
            parse_default_value("'{\"a\": 1}'::jsonb", "jsonb"),
            json!({"a": 1})
        );
        assert_eq!(parse_default_value("NULL", "text"), JsonValue::Null);
    }

    #[test]
    fn test_parse_default_value_expressions() {
        assert_eq!(
            parse_default_value("CURRENT_TIMESTAMP", "timestamp"),
            json!("CURRENT_TIMESTAMP")
        );
        assert_eq!(
            parse_default_value("nextval('users_id_seq'::regclass)", "bigint"),
            json!("nextval('users_id_seq'::regclass)")
        );
    }
}
