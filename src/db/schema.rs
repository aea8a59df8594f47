//! Schema introspection module.
//!
//! This module provides database schema introspection functionality
//! for SQLite, PostgreSQL, and MySQL databases.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface.
//!
//! Catalog queries run on a leased connection under the connection's
//! statement timeout, cancelled and discarded like any other statement.
//!
//! Table and schema names are validated as identifiers and then bound as
//! parameters; catalog SQL is never assembled from caller input. SQLite
//! reaches its catalog through the `pragma_*` table-valued functions so the
//! same holds there.

use crate::db::cancel::StatementGuard;
use crate::db::executor::{
    ResultShape, finish_lease, record_event, result_rows, run_statement, statement_outcome,
};
use crate::db::pool::{ConnectionLease, ConnectionRegistry, LeasedConnection};
use crate::db::transaction::DbTransaction;
use crate::db::validator::{QueryValidator, ValidatedStatement, Verb, validate_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, DatabaseType, ForeignKey, ForeignKeyAction, IndexInfo, QueryResult,
    TableInfo, TableSchema, TableType,
};
use std::time::{Duration, Instant};
use tokio::time::{error::Elapsed, timeout};
use tracing::debug;

/// Schema introspector for database introspection.
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    registry: ConnectionRegistry,
    validator: QueryValidator,
}

impl SchemaIntrospector {
    pub fn new(registry: ConnectionRegistry) -> Self {
        let validator = QueryValidator::new(registry.security());
        Self {
            registry,
            validator,
        }
    }

    /// Describe a table: columns, primary key, foreign keys and indexes.
    ///
    /// `schema` defaults to `public` (PostgreSQL), the current database
    /// (MySQL) or `main` (SQLite).
    pub async fn get_table_schema(
        &self,
        connection_id: &str,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        check_names(table, schema)?;
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();
        let conn = lease.connection_mut()?;
        let work = async move {
            match conn {
                LeasedConnection::Postgres(c) => postgres::table_schema(c, table, schema).await,
                LeasedConnection::MySql(c) => mysql::table_schema(c, table, schema).await,
                LeasedConnection::SQLite(c) => sqlite::table_schema(c, table, schema).await,
            }
        };
        let outcome = timeout(deadline, work).await;
        settle(lease, &guard, outcome, "get_table_schema", start).await
    }

    /// List tables and views in a schema.
    pub async fn list_tables(
        &self,
        connection_id: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableInfo>> {
        if let Some(s) = schema {
            validate_identifier(s)?;
        }
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();
        let conn = lease.connection_mut()?;
        let work = async move {
            match conn {
                LeasedConnection::Postgres(c) => postgres::list_tables(c, schema).await,
                LeasedConnection::MySql(c) => mysql::list_tables(c, schema).await,
                LeasedConnection::SQLite(c) => sqlite::list_tables(c, schema).await,
            }
        };
        let outcome = timeout(deadline, work).await;
        settle(lease, &guard, outcome, "list_tables", start).await
    }

    /// List user schemas. For SQLite these are the attached databases.
    pub async fn list_schemas(&self, connection_id: &str) -> DbResult<Vec<String>> {
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();
        let conn = lease.connection_mut()?;
        let work = async move {
            match conn {
                LeasedConnection::Postgres(c) => postgres::list_schemas(c).await,
                LeasedConnection::MySql(c) => mysql::list_schemas(c).await,
                LeasedConnection::SQLite(c) => sqlite::list_schemas(c).await,
            }
        };
        let outcome = timeout(deadline, work).await;
        settle(lease, &guard, outcome, "list_schemas", start).await
    }

    pub async fn get_table_indexes(
        &self,
        connection_id: &str,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<IndexInfo>> {
        check_names(table, schema)?;
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();
        let conn = lease.connection_mut()?;
        let work = async move {
            match conn {
                LeasedConnection::Postgres(c) => {
                    let schema = schema.unwrap_or(postgres::DEFAULT_SCHEMA);
                    postgres::table_type(c, table, schema).await?;
                    postgres::indexes(c, table, schema).await
                }
                LeasedConnection::MySql(c) => {
                    let schema = mysql::resolve_schema(c, schema).await?;
                    mysql::table_type(c, table, &schema).await?;
                    mysql::indexes(c, table, &schema).await
                }
                LeasedConnection::SQLite(c) => {
                    let schema = schema.unwrap_or(sqlite::DEFAULT_SCHEMA);
                    sqlite::table_type(c, table, schema).await?;
                    sqlite::indexes(c, table, schema).await
                }
            }
        };
        let outcome = timeout(deadline, work).await;
        settle(lease, &guard, outcome, "get_table_indexes", start).await
    }

    pub async fn get_foreign_keys(
        &self,
        connection_id: &str,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ForeignKey>> {
        check_names(table, schema)?;
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();
        let conn = lease.connection_mut()?;
        let work = async move {
            match conn {
                LeasedConnection::Postgres(c) => {
                    let schema = schema.unwrap_or(postgres::DEFAULT_SCHEMA);
                    postgres::table_type(c, table, schema).await?;
                    postgres::foreign_keys(c, table, schema).await
                }
                LeasedConnection::MySql(c) => {
                    let schema = mysql::resolve_schema(c, schema).await?;
                    mysql::table_type(c, table, &schema).await?;
                    mysql::foreign_keys(c, table, &schema).await
                }
                LeasedConnection::SQLite(c) => {
                    let schema = schema.unwrap_or(sqlite::DEFAULT_SCHEMA);
                    sqlite::table_type(c, table, schema).await?;
                    sqlite::foreign_keys(c, table, schema).await
                }
            }
        };
        let outcome = timeout(deadline, work).await;
        settle(lease, &guard, outcome, "get_foreign_keys", start).await
    }

    /// Return the query plan for `sql` as rows.
    ///
    /// The statement is validated under the connection's mode first. With
    /// `analyze` the statement really runs; on PostgreSQL anything that can
    /// change data is analyzed inside a transaction that is rolled back.
    pub async fn explain_query(
        &self,
        connection_id: &str,
        sql: &str,
        analyze: bool,
    ) -> DbResult<QueryResult> {
        let policy = self.registry.policy(connection_id).await?;
        let checked = self.validator.validate(sql, policy.validation_mode())?;
        let inner = sql.trim().trim_end_matches(';').trim_end();
        let plan = explain_statement(policy.db_type, inner, &checked, analyze)?;

        let shape = ResultShape::Rows(self.registry.security().max_rows as usize);
        let (mut lease, guard, deadline) = self.lease(connection_id).await?;
        let start = Instant::now();

        let outcome = timeout(deadline, run_explain(&mut lease, &plan, shape)).await;
        let result = guard.settle(outcome, "explain", start).await;

        record_event(
            self.registry.sink().as_ref(),
            connection_id,
            Verb::Explain,
            &plan.sql,
            0,
            start.elapsed(),
            statement_outcome(&result, result_rows),
        );
        finish_lease(lease, result.as_ref().err());
        result
    }

    /// Lease a connection under the connection's statement timeout, with
    /// cancellation armed.
    async fn lease(
        &self,
        connection_id: &str,
    ) -> DbResult<(ConnectionLease, StatementGuard, Duration)> {
        let deadline = self.registry.policy(connection_id).await?.statement_timeout;
        let mut lease = self.registry.acquire(connection_id).await?;
        match StatementGuard::arm(&mut lease, deadline).await {
            Ok(guard) => Ok((lease, guard, deadline)),
            Err(e) => {
                finish_lease(lease, Some(&e));
                Err(e)
            }
        }
    }
}

async fn run_explain(
    lease: &mut ConnectionLease,
    plan: &ExplainPlan,
    shape: ResultShape,
) -> DbResult<QueryResult> {
    let conn = lease.connection_mut()?;
    if !plan.rollback {
        return run_statement(conn.as_conn(), &plan.sql, &[], shape, false).await;
    }

    let mut tx = DbTransaction::begin(conn, None).await?;
    let result = run_statement(tx.conn(), &plan.sql, &[], shape, false).await;
    let rolled_back = tx.rollback().await;
    let result = result?;
    rolled_back?;
    Ok(result)
}

fn check_names(table: &str, schema: Option<&str>) -> DbResult<()> {
    validate_identifier(table)?;
    if let Some(s) = schema {
        validate_identifier(s)?;
    }
    Ok(())
}

/// Resolve catalog work that ran under a deadline and hand the lease back,
/// discarding it when the work was cancelled.
async fn settle<T>(
    lease: ConnectionLease,
    guard: &StatementGuard,
    outcome: Result<DbResult<T>, Elapsed>,
    operation: &str,
    start: Instant,
) -> DbResult<T> {
    let result = guard.settle(outcome, operation, start).await;
    finish_lease(lease, result.as_ref().err());
    result
}

/// EXPLAIN text for one backend, and whether it must run in a rolled-back
/// transaction.
#[derive(Debug, PartialEq, Eq)]
struct ExplainPlan {
    sql: String,
    rollback: bool,
}

fn explain_statement(
    db_type: DatabaseType,
    sql: &str,
    checked: &ValidatedStatement,
    analyze: bool,
) -> DbResult<ExplainPlan> {
    if checked.verb == Verb::Explain {
        return Err(DbError::invalid_input(
            "Pass the statement to explain, not an EXPLAIN statement",
        ));
    }

    match db_type {
        DatabaseType::PostgreSQL => {
            let options = if analyze {
                "ANALYZE, BUFFERS, FORMAT JSON"
            } else {
                "FORMAT JSON"
            };
            Ok(ExplainPlan {
                sql: format!("EXPLAIN ({options}) {sql}"),
                rollback: analyze && checked.modifies_data(),
            })
        }
        DatabaseType::MySQL => {
            if !analyze {
                return Ok(ExplainPlan {
                    sql: format!("EXPLAIN FORMAT=JSON {sql}"),
                    rollback: false,
                });
            }
            if !matches!(checked.verb, Verb::Select | Verb::With) || checked.modifies_data() {
                return Err(DbError::invalid_input(
                    "MySQL EXPLAIN ANALYZE supports read-only SELECT statements only",
                ));
            }
            Ok(ExplainPlan {
                sql: format!("EXPLAIN ANALYZE {sql}"),
                rollback: false,
            })
        }
        DatabaseType::SQLite => {
            if analyze {
                return Err(DbError::invalid_input(
                    "SQLite cannot analyze a statement; use analyze=false for EXPLAIN QUERY PLAN",
                ));
            }
            Ok(ExplainPlan {
                sql: format!("EXPLAIN QUERY PLAN {sql}"),
                rollback: false,
            })
        }
    }
}

/// Primary key column names in key order from `(position, name)` pairs.
fn primary_key_in_order(mut keyed: Vec<(i64, String)>) -> Vec<String> {
    keyed.sort_by_key(|(position, _)| *position);
    keyed.into_iter().map(|(_, name)| name).collect()
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Centralized SQL queries for schema introspection. Each database has its own
// submodule with queries adapted to its specific system catalogs.

mod queries {
    pub mod postgres {
        pub const TABLE_TYPE: &str = r#"
            SELECT
                c.relkind::text AS kind,
                obj_description(c.oid, 'pg_class') AS comment
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1 AND n.nspname = $2
            AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT
                c.relname::text AS table_name,
                c.relkind::text AS kind,
                CASE WHEN c.reltuples >= 0 THEN c.reltuples::int8 END AS row_count,
                obj_description(c.oid, 'pg_class') AS comment
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
            AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
            ORDER BY c.relname
            "#;

        pub const LIST_SCHEMAS: &str = r#"
            SELECT nspname::text AS schema_name
            FROM pg_namespace
            WHERE nspname <> 'information_schema'
            AND nspname !~ '^pg_'
            ORDER BY nspname
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            a.attname::text AS column_name,
            a.attnum::int4 AS ordinal,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            NOT a.attnotnull AS nullable,
            pg_get_expr(d.adbin, d.adrelid) AS column_default,
            col_description(c.oid, a.attnum) AS column_comment
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE c.relname = $1 AND n.nspname = $2
        AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum
        "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
        SELECT
            k.pos AS position,
            a.attname::text AS column_name
        FROM pg_index ix
        JOIN pg_class c ON c.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, pos)
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
        WHERE c.relname = $1 AND n.nspname = $2 AND ix.indisprimary
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            con.conname::text AS constraint_name,
            a.attname::text AS column_name,
            rt.relname::text AS foreign_table_name,
            ra.attname::text AS foreign_column_name,
            con.confdeltype::text AS delete_rule,
            con.confupdtype::text AS update_rule
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_class rt ON rt.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, pos)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
        WHERE con.contype = 'f' AND t.relname = $1 AND n.nspname = $2
        ORDER BY con.conname, k.pos
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey::int2[], a.attnum)) AS column_names,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            am.amname::text AS index_algorithm
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        LEFT JOIN pg_am am ON am.oid = i.relam
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $1 AND n.nspname = $2
        GROUP BY i.relname, ix.indisunique, ix.indisprimary, am.amname
        ORDER BY i.relname
        "#;
    }

    pub mod mysql {
        pub const CURRENT_DATABASE: &str = "SELECT DATABASE()";

        pub const TABLE_TYPE: &str = r#"
            SELECT
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE,
                CONVERT(TABLE_COMMENT USING utf8) AS TABLE_COMMENT
            FROM information_schema.TABLES
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE,
                TABLE_ROWS as ROW_COUNT,
                CONVERT(TABLE_COMMENT USING utf8) AS TABLE_COMMENT
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
            "#;

        pub const LIST_SCHEMAS: &str = r#"
            SELECT CONVERT(SCHEMA_NAME USING utf8) AS SCHEMA_NAME
            FROM information_schema.SCHEMATA
            WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
            ORDER BY SCHEMA_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            ORDINAL_POSITION,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CONVERT(COLUMN_COMMENT USING utf8) AS COLUMN_COMMENT
        FROM information_schema.COLUMNS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(k.CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
            CONVERT(k.COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(k.REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME,
            CONVERT(k.REFERENCED_COLUMN_NAME USING utf8) AS REFERENCED_COLUMN_NAME,
            CONVERT(rc.DELETE_RULE USING utf8) AS DELETE_RULE,
            CONVERT(rc.UPDATE_RULE USING utf8) AS UPDATE_RULE
        FROM information_schema.KEY_COLUMN_USAGE k
        JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
            ON rc.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
            AND rc.CONSTRAINT_NAME = k.CONSTRAINT_NAME
            AND rc.TABLE_NAME = k.TABLE_NAME
        WHERE k.TABLE_NAME = ? AND k.TABLE_SCHEMA = ?
        AND k.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) as COLUMN_NAMES,
            NOT NON_UNIQUE as IS_UNIQUE,
            CONVERT(INDEX_TYPE USING utf8) AS INDEX_ALGORITHM
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
        GROUP BY INDEX_NAME, NON_UNIQUE, INDEX_TYPE
        ORDER BY INDEX_NAME
        "#;
    }

    pub mod sqlite {
        pub const TABLE_TYPE: &str = r#"
            SELECT type FROM pragma_table_list
            WHERE schema = ? AND name = ?
            AND type IN ('table', 'view')
            "#;

        pub const LIST_TABLES: &str = r#"
            SELECT name, type FROM pragma_table_list
            WHERE schema = ?
            AND type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const LIST_SCHEMAS: &str = r#"
            SELECT name FROM pragma_database_list
            WHERE name <> 'temp'
            ORDER BY seq
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT cid, name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?, ?)
            ORDER BY cid
            "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT id, seq, "table", "from", "to", on_update, on_delete
            FROM pragma_foreign_key_list(?, ?)
            ORDER BY id, seq
            "#;

        pub const DESCRIBE_INDEXES: &str = r#"
            SELECT name, "unique", origin
            FROM pragma_index_list(?, ?)
            ORDER BY name
            "#;

        pub const DESCRIBE_INDEX_COLUMNS: &str = r#"
            SELECT name FROM pragma_index_info(?, ?)
            ORDER BY seqno
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub const DEFAULT_SCHEMA: &str = "public";

    /// Table kind and comment, or `TableNotFound`.
    pub async fn table_type(
        conn: &mut PgConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<(TableType, Option<String>)> {
        let row = sqlx::query(queries::postgres::TABLE_TYPE)
            .bind(table)
            .bind(schema)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::table_not_found(table, Some(schema)))?;

        let kind: String = row.try_get("kind")?;
        let comment: Option<String> = row.try_get("comment")?;
        Ok((TableType::parse(&kind), comment.filter(|c| !c.is_empty())))
    }

    pub async fn list_tables(conn: &mut PgConnection, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        let schema_name = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .bind(schema_name)
            .fetch_all(&mut *conn)
            .await?;

        let tables = rows
            .iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let row_count: Option<i64> = row.try_get("row_count")?;
                let comment: Option<String> = row.try_get("comment")?;
                Ok(TableInfo {
                    name: row.try_get("table_name")?,
                    schema: schema_name.to_string(),
                    table_type: TableType::parse(&kind),
                    row_count: row_count.map(|n| n as u64),
                    comment: comment.filter(|c| !c.is_empty()),
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        debug!(
            count = tables.len(),
            schema = schema_name,
            "Listed PostgreSQL tables"
        );
        Ok(tables)
    }

    pub async fn list_schemas(conn: &mut PgConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::LIST_SCHEMAS)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get("schema_name").map_err(DbError::from))
            .collect()
    }

    pub async fn table_schema(
        conn: &mut PgConnection,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        let schema_name = schema.unwrap_or(DEFAULT_SCHEMA);
        let (table_type, comment) = table_type(&mut *conn, table, schema_name).await?;

        let columns = fetch_columns(&mut *conn, table, schema_name).await?;
        let primary_key = fetch_primary_key(&mut *conn, table, schema_name).await?;
        let columns = columns
            .into_iter()
            .map(|c| {
                let is_pk = primary_key.contains(&c.name);
                c.with_primary_key(is_pk)
            })
            .collect();

        Ok(TableSchema {
            table_name: table.to_string(),
            schema_name: schema_name.to_string(),
            table_type,
            comment,
            columns,
            primary_key,
            foreign_keys: foreign_keys(&mut *conn, table, schema_name).await?,
            indexes: indexes(&mut *conn, table, schema_name).await?,
        })
    }

    async fn fetch_columns(
        conn: &mut PgConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name")?;
                let ordinal: i32 = row.try_get("ordinal")?;
                let column_type: String = row.try_get("column_type")?;
                let nullable: bool = row.try_get("nullable")?;
                let default_value: Option<String> = row.try_get("column_default")?;
                let comment: Option<String> = row.try_get("column_comment")?;

                Ok(
                    ColumnDefinition::new(name, ordinal as u32, column_type, nullable)
                        .with_default_str(default_value.as_deref())
                        .with_comment(comment),
                )
            })
            .collect()
    }

    async fn fetch_primary_key(conn: &mut PgConnection, table: &str, schema: &str) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_PRIMARY_KEY)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let keyed = rows
            .iter()
            .map(|row| Ok((row.try_get::<i64, _>("position")?, row.try_get("column_name")?)))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(primary_key_in_order(keyed))
    }

    pub async fn foreign_keys(conn: &mut PgConnection, table: &str, schema: &str) -> DbResult<Vec<ForeignKey>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| {
                let delete_rule: String = row.try_get("delete_rule")?;
                let update_rule: String = row.try_get("update_rule")?;
                Ok(ForeignKey {
                    name: row.try_get("constraint_name")?,
                    column: row.try_get("column_name")?,
                    references_table: row.try_get("foreign_table_name")?,
                    references_column: row.try_get("foreign_column_name")?,
                    on_delete: ForeignKeyAction::parse(&delete_rule),
                    on_update: ForeignKeyAction::parse(&update_rule),
                })
            })
            .collect()
    }

    pub async fn indexes(conn: &mut PgConnection, table: &str, schema: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let columns: Vec<String> = row.try_get("column_names")?;
            if columns.is_empty() {
                continue;
            }
            let index_algorithm: Option<String> = row.try_get("index_algorithm")?;
            indexes.push(IndexInfo {
                name: row.try_get("index_name")?,
                columns,
                is_unique: row.try_get("is_unique")?,
                is_primary: row.try_get("is_primary")?,
                index_algorithm: index_algorithm.filter(|a| !a.is_empty()),
            });
        }
        Ok(indexes)
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    /// Try to get a u64 value from a row, handling MySQL version differences.
    /// MySQL 5.x may return BIGINT (i64), MySQL 8.x returns BIGINT UNSIGNED (u64).
    fn try_get_u64(row: &MySqlRow, column: &str) -> Option<u64> {
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(column) {
            return Some(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
            return Some(v as u64);
        }
        None
    }

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    /// The requested schema, or the connection's current database.
    pub async fn resolve_schema(conn: &mut MySqlConnection, schema: Option<&str>) -> DbResult<String> {
        if let Some(s) = schema {
            return Ok(s.to_string());
        }
        let row = sqlx::query(queries::mysql::CURRENT_DATABASE)
            .fetch_one(&mut *conn)
            .await?;
        let current = row.try_get::<Option<String>, _>(0).ok().flatten().or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(0)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        });
        current.ok_or_else(|| {
            DbError::invalid_input("No database selected; pass a schema name explicitly")
        })
    }

    /// Views carry the literal comment "VIEW" in information_schema.
    fn table_comment(table_type: &TableType, comment: Option<String>) -> Option<String> {
        comment.filter(|c| !c.is_empty() && !(*table_type == TableType::View && c == "VIEW"))
    }

    pub async fn table_type(
        conn: &mut MySqlConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<(TableType, Option<String>)> {
        let row = sqlx::query(queries::mysql::TABLE_TYPE)
            .bind(table)
            .bind(schema)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::table_not_found(table, Some(schema)))?;

        let table_type = TableType::parse(&get_string(&row, "TABLE_TYPE"));
        let comment = table_comment(&table_type, get_optional_string(&row, "TABLE_COMMENT"));
        Ok((table_type, comment))
    }

    pub async fn list_tables(conn: &mut MySqlConnection, schema: Option<&str>) -> DbResult<Vec<TableInfo>> {
        let schema_name = resolve_schema(&mut *conn, schema).await?;
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await?;

        let tables = rows
            .iter()
            .filter_map(|row| {
                let name = get_string(row, "TABLE_NAME");
                if name.is_empty() {
                    return None;
                }
                let table_type = TableType::parse(&get_string(row, "TABLE_TYPE"));
                let comment = table_comment(&table_type, get_optional_string(row, "TABLE_COMMENT"));
                Some(TableInfo {
                    name,
                    schema: schema_name.clone(),
                    row_count: try_get_u64(row, "ROW_COUNT"),
                    table_type,
                    comment,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), schema = %schema_name, "Listed MySQL tables");
        Ok(tables)
    }

    pub async fn list_schemas(conn: &mut MySqlConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::LIST_SCHEMAS)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| get_string(row, "SCHEMA_NAME"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub async fn table_schema(
        conn: &mut MySqlConnection,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        let schema_name = resolve_schema(&mut *conn, schema).await?;
        let (table_type, comment) = table_type(&mut *conn, table, &schema_name).await?;

        Ok(TableSchema {
            table_name: table.to_string(),
            table_type,
            comment,
            columns: fetch_columns(&mut *conn, table, &schema_name).await?,
            primary_key: fetch_primary_key(&mut *conn, table, &schema_name).await?,
            foreign_keys: foreign_keys(&mut *conn, table, &schema_name).await?,
            indexes: indexes(&mut *conn, table, &schema_name).await?,
            schema_name,
        })
    }

    async fn fetch_columns(
        conn: &mut MySqlConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let ordinal = try_get_u64(row, "ORDINAL_POSITION").unwrap_or_default();
                let default_value = get_optional_string(row, "COLUMN_DEFAULT");
                ColumnDefinition::new(
                    get_string(row, "COLUMN_NAME"),
                    ordinal as u32,
                    get_string(row, "COLUMN_TYPE"),
                    get_string(row, "IS_NULLABLE") == "YES",
                )
                .with_primary_key(get_string(row, "COLUMN_KEY") == "PRI")
                .with_default_str(default_value.as_deref())
                .with_comment(get_optional_string(row, "COLUMN_COMMENT"))
            })
            .collect())
    }

    async fn fetch_primary_key(
        conn: &mut MySqlConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_PRIMARY_KEY)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.iter().map(|row| get_string(row, "COLUMN_NAME")).collect())
    }

    pub async fn foreign_keys(
        conn: &mut MySqlConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<Vec<ForeignKey>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ForeignKey {
                name: get_optional_string(row, "CONSTRAINT_NAME"),
                column: get_string(row, "COLUMN_NAME"),
                references_table: get_string(row, "REFERENCED_TABLE_NAME"),
                references_column: get_string(row, "REFERENCED_COLUMN_NAME"),
                on_delete: ForeignKeyAction::parse(&get_string(row, "DELETE_RULE")),
                on_update: ForeignKeyAction::parse(&get_string(row, "UPDATE_RULE")),
            })
            .collect())
    }

    pub async fn indexes(conn: &mut MySqlConnection, table: &str, schema: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "INDEX_NAME");
                let columns = get_string(row, "COLUMN_NAMES")
                    .split(',')
                    .map(str::to_string)
                    .collect();
                let is_unique: i64 = row.try_get("IS_UNIQUE").unwrap_or(0);
                let is_primary = name == "PRIMARY";
                IndexInfo {
                    name,
                    columns,
                    is_unique: is_unique != 0 || is_primary,
                    is_primary,
                    index_algorithm: get_optional_string(row, "INDEX_ALGORITHM")
                        .filter(|a| !a.is_empty()),
                }
            })
            .collect())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    pub const DEFAULT_SCHEMA: &str = "main";

    pub async fn table_type(conn: &mut SqliteConnection, table: &str, schema: &str) -> DbResult<TableType> {
        let row = sqlx::query(queries::sqlite::TABLE_TYPE)
            .bind(schema)
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::table_not_found(table, Some(schema)))?;
        let kind: String = row.try_get("type")?;
        Ok(TableType::parse(&kind))
    }

    pub async fn list_tables(
        conn: &mut SqliteConnection,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableInfo>> {
        let schema_name = schema.unwrap_or(DEFAULT_SCHEMA);
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .bind(schema_name)
            .fetch_all(&mut *conn)
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let kind: String = row.try_get("type")?;
            let table_type = TableType::parse(&kind);
            let row_count = if table_type == TableType::Table {
                count_rows(&mut *conn, schema_name, &name).await
            } else {
                None
            };
            tables.push(TableInfo {
                name,
                schema: schema_name.to_string(),
                table_type,
                row_count,
                comment: None,
            });
        }

        debug!(count = tables.len(), schema = schema_name, "Listed SQLite tables");
        Ok(tables)
    }

    /// Exact count. Names that are not plain identifiers are skipped since
    /// they would have to be interpolated.
    async fn count_rows(conn: &mut SqliteConnection, schema: &str, table: &str) -> Option<u64> {
        if validate_identifier(schema).is_err() || validate_identifier(table).is_err() {
            return None;
        }
        let sql = format!(r#"SELECT COUNT(*) FROM "{schema}"."{table}""#);
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&mut *conn)
            .await
            .ok()
            .map(|n| n as u64)
    }

    pub async fn list_schemas(conn: &mut SqliteConnection) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::sqlite::LIST_SCHEMAS)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get("name").map_err(DbError::from))
            .collect()
    }

    pub async fn table_schema(
        conn: &mut SqliteConnection,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        let schema_name = schema.unwrap_or(DEFAULT_SCHEMA);
        let table_type = table_type(&mut *conn, table, schema_name).await?;
        let (columns, primary_key) = fetch_columns(&mut *conn, table, schema_name).await?;

        Ok(TableSchema {
            table_name: table.to_string(),
            schema_name: schema_name.to_string(),
            table_type,
            comment: None,
            columns,
            primary_key,
            foreign_keys: foreign_keys(&mut *conn, table, schema_name).await?,
            indexes: indexes(&mut *conn, table, schema_name).await?,
        })
    }

    /// Columns plus the primary key in key order (`pk` is the 1-based
    /// position within the key).
    async fn fetch_columns(
        conn: &mut SqliteConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<(Vec<ColumnDefinition>, Vec<String>)> {
        let rows = sqlx::query(queries::sqlite::DESCRIBE_COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut keyed = Vec::new();
        for row in &rows {
            let cid: i64 = row.try_get("cid")?;
            let name: String = row.try_get("name")?;
            let data_type: String = row.try_get("type")?;
            let notnull: i64 = row.try_get("notnull")?;
            let default_value: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            if pk > 0 {
                keyed.push((pk, name.clone()));
            }
            columns.push(
                ColumnDefinition::new(name, (cid + 1) as u32, data_type, notnull == 0)
                    .with_primary_key(pk > 0)
                    .with_default_str(default_value.as_deref()),
            );
        }
        Ok((columns, primary_key_in_order(keyed)))
    }

    pub async fn foreign_keys(
        conn: &mut SqliteConnection,
        table: &str,
        schema: &str,
    ) -> DbResult<Vec<ForeignKey>> {
        let rows = sqlx::query(queries::sqlite::DESCRIBE_FOREIGN_KEYS)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let seq: i64 = row.try_get("seq")?;
            let ref_table: String = row.try_get("table")?;
            let on_delete: String = row.try_get("on_delete")?;
            let on_update: String = row.try_get("on_update")?;
            // NULL "to" means the referenced table's primary key
            let ref_column = match row.try_get::<Option<String>, _>("to")? {
                Some(column) => column,
                None => fetch_columns(&mut *conn, &ref_table, schema)
                    .await?
                    .1
                    .into_iter()
                    .nth(seq as usize)
                    .unwrap_or_default(),
            };

            keys.push(ForeignKey {
                name: None,
                column: row.try_get("from")?,
                references_table: ref_table,
                references_column: ref_column,
                on_delete: ForeignKeyAction::parse(&on_delete),
                on_update: ForeignKeyAction::parse(&on_update),
            });
        }
        Ok(keys)
    }

    pub async fn indexes(conn: &mut SqliteConnection, table: &str, schema: &str) -> DbResult<Vec<IndexInfo>> {
        let idx_list = sqlx::query(queries::sqlite::DESCRIBE_INDEXES)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        let mut indexes = Vec::with_capacity(idx_list.len());
        for idx_row in &idx_list {
            let name: String = idx_row.try_get("name")?;
            let is_unique: i64 = idx_row.try_get("unique")?;
            let origin: String = idx_row.try_get("origin")?;

            let columns: Vec<String> = sqlx::query(queries::sqlite::DESCRIBE_INDEX_COLUMNS)
                .bind(&name)
                .bind(schema)
                .fetch_all(&mut *conn)
                .await?
                .iter()
                // expression columns have no name
                .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();

            if !columns.is_empty() {
                indexes.push(IndexInfo {
                    name,
                    columns,
                    is_unique: is_unique != 0,
                    is_primary: origin == "pk",
                    index_algorithm: None,
                });
            }
        }
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::db::validator::ValidationMode;

    fn explain(db_type: DatabaseType, sql: &str, analyze: bool) -> DbResult<ExplainPlan> {
        let checked = QueryValidator::new(&SecurityConfig::default().with_allowed_operations([
            "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "EXPLAIN",
        ]))
        .validate(sql, ValidationMode::ReadWrite)
        .unwrap();
        explain_statement(db_type, sql, &checked, analyze)
    }

    #[test]
    fn test_postgres_explain_text() {
        let plan = explain(DatabaseType::PostgreSQL, "SELECT 1", false).unwrap();
        assert_eq!(plan.sql, "EXPLAIN (FORMAT JSON) SELECT 1");
        assert!(!plan.rollback);

        let plan = explain(DatabaseType::PostgreSQL, "DELETE FROM t", true).unwrap();
        assert_eq!(plan.sql, "EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) DELETE FROM t");
        assert!(plan.rollback);

        let plan = explain(DatabaseType::PostgreSQL, "SELECT * FROM t", true).unwrap();
        assert!(!plan.rollback);
    }

    #[test]
    fn test_postgres_analyze_rolls_back_writes_behind_read_verbs() {
        let hidden_writes = [
            "WITH gone AS (DELETE FROM users RETURNING id) SELECT * FROM gone",
            "SELECT * INTO backup FROM users",
        ];
        for sql in hidden_writes {
            let plan = explain(DatabaseType::PostgreSQL, sql, true).unwrap();
            assert!(plan.rollback, "{sql}");
        }
    }

    #[test]
    fn test_mysql_explain_analyze_select_only() {
        let plan = explain(DatabaseType::MySQL, "SELECT 1", true).unwrap();
        assert_eq!(plan.sql, "EXPLAIN ANALYZE SELECT 1");

        for sql in ["DELETE FROM t", "SELECT * INTO backup FROM users"] {
            let err = explain(DatabaseType::MySQL, sql, true).unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }), "{sql}");
        }

        let plan = explain(DatabaseType::MySQL, "DELETE FROM t", false).unwrap();
        assert_eq!(plan.sql, "EXPLAIN FORMAT=JSON DELETE FROM t");
    }

    #[test]
    fn test_sqlite_explain() {
        let plan = explain(DatabaseType::SQLite, "SELECT 1", false).unwrap();
        assert_eq!(plan.sql, "EXPLAIN QUERY PLAN SELECT 1");
        assert!(explain(DatabaseType::SQLite, "SELECT 1", true).is_err());
    }

    #[test]
    fn test_nested_explain_rejected() {
        let err = explain(DatabaseType::PostgreSQL, "EXPLAIN SELECT 1", false).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_primary_key_order() {
        let keyed = vec![(2, "b".to_string()), (1, "a".to_string()), (3, "c".to_string())];
        assert_eq!(primary_key_in_order(keyed), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_names_validated() {
        assert!(check_names("users", Some("public")).is_ok());
        assert!(matches!(
            check_names("users; DROP TABLE x", None),
            Err(DbError::SecurityValidation { .. })
        ));
        assert!(check_names("users", Some("bad schema")).is_err());
    }
}
