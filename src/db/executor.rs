//! Query execution engine.
//!
//! This module provides query execution functionality with support for:
//! - Parameterized queries (positional binding only)
//! - Row limits (enforced via streaming - only fetches needed rows)
//! - Statement timeouts that cancel the statement and discard the connection
//! - Batches of parameter sets on one connection
//!
//! # Architecture
//!
//! Every public entry point follows the same steps: look up the connection
//! policy, validate the SQL, lease a connection, run under a deadline, report
//! to the statement sink. The lease is returned on drop; when the deadline
//! fires the statement is cancelled and the lease discarded.
//!
//! The per-backend work lives in the `mysql`, `postgres` and `sqlite`
//! submodules, which are kept parallel so the differences stand out.

use crate::db::cancel::StatementGuard;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::{ConnectionLease, ConnectionPolicy, ConnectionRegistry};
use crate::db::sink::{StatementEvent, StatementOutcome, StatementSink};
use crate::db::types::{JsonRow, RowToJson, column_metadata};
use crate::db::validator::{QueryValidator, ValidatedStatement, Verb};
use crate::error::{DbError, DbResult};
use crate::models::{
    BatchResult, ColumnMetadata, QueryOptions, QueryParam, QueryRequest, QueryResult, RowSet,
    UpdateResult,
};
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use sqlx::{Executor, MySqlConnection, PgConnection, SqliteConnection};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Key under which auto-increment ids are reported.
pub const GENERATED_KEY: &str = "generated_key";

/// Mutable borrow of one backend connection, either a leased pool connection
/// or the inside of a transaction.
pub(crate) enum ConnRef<'c> {
    MySql(&'c mut MySqlConnection),
    Postgres(&'c mut PgConnection),
    SQLite(&'c mut SqliteConnection),
}

/// What a statement produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultShape {
    /// Row-returning verb, capped at a row limit
    Rows(usize),
    /// Mutation with RETURNING; every returned row is kept
    Returning,
    /// Plain mutation or DDL
    Update { is_insert: bool },
}

impl ResultShape {
    pub(crate) fn of(statement: &ValidatedStatement, row_limit: usize) -> Self {
        let cte_mutation = statement.verb == Verb::With && is_dml(statement);
        if statement.verb.returns_rows() && !cte_mutation {
            Self::Rows(row_limit)
        } else if statement.has_keyword("RETURNING") {
            Self::Returning
        } else {
            Self::Update {
                is_insert: statement.verb == Verb::Insert || statement.has_keyword("INSERT"),
            }
        }
    }
}

/// Carries a DML verb. UPDATE needs SET so `FOR UPDATE` locking reads stay
/// row-returning.
fn is_dml(statement: &ValidatedStatement) -> bool {
    ["INSERT", "DELETE", "MERGE"]
        .iter()
        .any(|w| statement.has_keyword(w))
        || (statement.has_keyword("UPDATE") && statement.has_keyword("SET"))
}

/// Run one statement on an already-held connection. No timeout, no sink.
pub(crate) async fn run_statement(
    conn: ConnRef<'_>,
    sql: &str,
    params: &[QueryParam],
    shape: ResultShape,
    decode_binary: bool,
) -> DbResult<QueryResult> {
    let start = Instant::now();
    let mut result = match shape {
        ResultShape::Rows(limit) => {
            QueryResult::Rows(fetch_row_set(conn, sql, params, Some(limit), decode_binary).await?)
        }
        ResultShape::Returning => {
            let rows = fetch_row_set(conn, sql, params, None, decode_binary).await?;
            QueryResult::Update(UpdateResult {
                affected_rows: rows.rows.len() as u64,
                generated_keys: rows.rows,
                execution_time_ms: 0,
            })
        }
        ResultShape::Update { is_insert } => {
            QueryResult::Update(execute_update(conn, sql, params, is_insert).await?)
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &mut result {
        QueryResult::Rows(r) => r.execution_time_ms = elapsed_ms,
        QueryResult::Update(u) => u.execution_time_ms = elapsed_ms,
        QueryResult::Batch(b) => b.execution_time_ms = elapsed_ms,
    }
    Ok(result)
}

async fn fetch_row_set(
    conn: ConnRef<'_>,
    sql: &str,
    params: &[QueryParam],
    limit: Option<usize>,
    decode_binary: bool,
) -> DbResult<RowSet> {
    match conn {
        ConnRef::MySql(c) => mysql::fetch_row_set(c, sql, params, limit, decode_binary).await,
        ConnRef::Postgres(c) => postgres::fetch_row_set(c, sql, params, limit, decode_binary).await,
        ConnRef::SQLite(c) => sqlite::fetch_row_set(c, sql, params, limit, decode_binary).await,
    }
}

async fn execute_update(
    conn: ConnRef<'_>,
    sql: &str,
    params: &[QueryParam],
    is_insert: bool,
) -> DbResult<UpdateResult> {
    match conn {
        ConnRef::MySql(c) => mysql::execute(c, sql, params, is_insert).await,
        ConnRef::Postgres(c) => postgres::execute(c, sql, params).await,
        ConnRef::SQLite(c) => sqlite::execute(c, sql, params, is_insert).await,
    }
}

/// Rows fetched from a stream of `limit + 1`, turned into a row set.
fn row_set_from<R: RowToJson>(
    rows: Vec<R>,
    limit: Option<usize>,
    described: impl FnOnce() -> Vec<ColumnMetadata>,
    decode_binary: bool,
) -> RowSet {
    let has_more = limit.is_some_and(|l| rows.len() > l);
    let keep = limit.unwrap_or(rows.len()).min(rows.len());

    let columns = match rows.first() {
        Some(first) => first.column_metadata(),
        None => described(),
    };
    let json_rows: Vec<JsonRow> = rows
        .iter()
        .take(keep)
        .map(|r| r.to_json_map(&columns, decode_binary))
        .collect();

    if has_more {
        debug!(limit = keep, "Row limit reached, result truncated");
    }

    RowSet {
        columns,
        rows: json_rows,
        has_more,
        execution_time_ms: 0,
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    results
        .into_iter()
        .map(|r| r.map_err(DbError::from))
        .collect()
}

fn stream_cap(limit: Option<usize>) -> usize {
    limit.map_or(usize::MAX, |l| l.saturating_add(1))
}

fn generated_key_row(key: impl Into<serde_json::Number>) -> JsonRow {
    let mut row = JsonRow::new();
    row.insert(GENERATED_KEY.to_string(), JsonValue::Number(key.into()));
    row
}

/// Sink outcome for a finished statement.
pub(crate) fn statement_outcome<T>(
    result: &DbResult<T>,
    rows: impl FnOnce(&T) -> u64,
) -> StatementOutcome {
    match result {
        Ok(value) => StatementOutcome::Succeeded { rows: rows(value) },
        Err(DbError::Timeout { .. }) => StatementOutcome::TimedOut,
        Err(e) => StatementOutcome::Failed { code: e.code() },
    }
}

/// Rows returned or affected, for the sink.
pub(crate) fn result_rows(result: &QueryResult) -> u64 {
    result.row_count()
}

// =============================================================================
// QueryExecutor
// =============================================================================

/// Executes validated statements against registered connections.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    registry: ConnectionRegistry,
    validator: QueryValidator,
}

impl QueryExecutor {
    /// Create an executor sharing the registry's pools, security config and sink.
    pub fn new(registry: ConnectionRegistry) -> Self {
        let validator = QueryValidator::new(registry.security());
        Self {
            registry,
            validator,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn max_rows(&self) -> usize {
        self.registry.security().max_rows as usize
    }

    /// Execute one statement. Row sets are capped at `options.fetch_size`
    /// when set, otherwise at the configured `max_rows`.
    pub async fn execute(
        &self,
        connection_id: &str,
        request: &QueryRequest,
    ) -> DbResult<QueryResult> {
        let limit = match request.options.fetch_size {
            Some(fetch_size) => self.clamp_limit(fetch_size),
            None => self.max_rows(),
        };
        self.execute_capped(connection_id, request, limit).await
    }

    /// Execute with an explicit row cap; `has_more` reports whether the
    /// cursor had further rows. `fetch_size` is clamped to `1..=max_rows`.
    pub async fn execute_with_limit(
        &self,
        connection_id: &str,
        request: &QueryRequest,
        fetch_size: u32,
    ) -> DbResult<QueryResult> {
        let limit = self.clamp_limit(fetch_size);
        self.execute_capped(connection_id, request, limit).await
    }

    fn clamp_limit(&self, fetch_size: u32) -> usize {
        (fetch_size as usize).clamp(1, self.max_rows().max(1))
    }

    async fn execute_capped(
        &self,
        connection_id: &str,
        request: &QueryRequest,
        row_limit: usize,
    ) -> DbResult<QueryResult> {
        let policy = self.registry.policy(connection_id).await?;
        let statement = self
            .validator
            .validate(&request.sql, policy.validation_mode())?;
        let deadline = policy.timeout_for(request.options.timeout);
        let shape = ResultShape::of(&statement, row_limit);

        debug!(
            connection_id = %connection_id,
            verb = %statement.verb,
            params = request.params.len(),
            ?shape,
            timeout_ms = deadline.as_millis() as u64,
            "Executing statement"
        );

        let mut lease = self.registry.acquire(connection_id).await?;
        let start = Instant::now();
        let result = match StatementGuard::arm(&mut lease, deadline).await {
            Ok(guard) => {
                run_leased(
                    &mut lease,
                    &guard,
                    deadline,
                    &request.sql,
                    &request.params,
                    shape,
                    request.options.decode_binary,
                )
                .await
            }
            Err(e) => Err(e),
        };
        finish_lease(lease, result.as_ref().err());

        self.record(
            &policy,
            &statement,
            &request.sql,
            request.params.len(),
            start.elapsed(),
            statement_outcome(&result, result_rows),
        );
        result
    }

    /// Execute one statement once per parameter set, in order, on a single
    /// connection in autocommit mode.
    ///
    /// On failure at entry `i`, entries before `i` stay applied and are
    /// reported in [`DbError::BatchFailed`].
    pub async fn execute_batch(
        &self,
        connection_id: &str,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
        options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        if param_sets.is_empty() {
            return Err(DbError::invalid_input(
                "Batch requires at least one parameter set",
            ));
        }

        let policy = self.registry.policy(connection_id).await?;
        let statement = self.validator.validate(sql, policy.validation_mode())?;
        let deadline = policy.timeout_for(options.timeout);
        // Batches report counts only; RETURNING rows are not collected
        let shape = ResultShape::Update { is_insert: false };

        debug!(
            connection_id = %connection_id,
            verb = %statement.verb,
            entries = param_sets.len(),
            timeout_ms = deadline.as_millis() as u64,
            "Executing batch"
        );

        let mut lease = self.registry.acquire(connection_id).await?;
        let batch_start = Instant::now();
        let guard = match StatementGuard::arm(&mut lease, deadline).await {
            Ok(guard) => guard,
            Err(e) => {
                finish_lease(lease, Some(&e));
                return Err(e);
            }
        };
        let mut entries = Vec::with_capacity(param_sets.len());

        for (index, params) in param_sets.iter().enumerate() {
            let remaining = deadline.saturating_sub(batch_start.elapsed());
            let start = Instant::now();
            let result = if remaining.is_zero() {
                Err(DbError::timeout(
                    "batch execution",
                    batch_start.elapsed().as_millis() as u64,
                ))
            } else {
                run_leased(&mut lease, &guard, remaining, sql, params, shape, false).await
            };

            self.record(
                &policy,
                &statement,
                sql,
                params.len(),
                start.elapsed(),
                statement_outcome(&result, result_rows),
            );

            match result {
                Ok(r) => entries.push(r.affected_rows().unwrap_or(0)),
                Err(source) => {
                    warn!(
                        connection_id = %connection_id,
                        failed_index = index,
                        completed = entries.len(),
                        code = source.code(),
                        "Batch entry failed"
                    );
                    finish_lease(lease, Some(&source));
                    return Err(DbError::BatchFailed {
                        failed_index: index,
                        completed: entries,
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(QueryResult::Batch(BatchResult {
            affected_rows: entries.iter().sum(),
            entries,
            execution_time_ms: batch_start.elapsed().as_millis() as u64,
        }))
    }

    fn record(
        &self,
        policy: &ConnectionPolicy,
        statement: &ValidatedStatement,
        sql: &str,
        param_count: usize,
        duration: Duration,
        outcome: StatementOutcome,
    ) {
        record_event(
            self.registry.sink().as_ref(),
            &policy.connection_id,
            statement.verb.clone(),
            sql,
            param_count,
            duration,
            outcome,
        );
    }
}

pub(crate) fn record_event(
    sink: &dyn StatementSink,
    connection_id: &str,
    verb: Verb,
    sql: &str,
    param_count: usize,
    duration: Duration,
    outcome: StatementOutcome,
) {
    sink.record(&StatementEvent::new(
        connection_id,
        verb,
        sql,
        param_count,
        duration,
        outcome,
    ));
}

/// Run one statement on a lease under `deadline`; an overrunning statement
/// is cancelled through `guard`.
async fn run_leased(
    lease: &mut ConnectionLease,
    guard: &StatementGuard,
    deadline: Duration,
    sql: &str,
    params: &[QueryParam],
    shape: ResultShape,
    decode_binary: bool,
) -> DbResult<QueryResult> {
    let start = Instant::now();
    let conn = lease.connection_mut()?.as_conn();
    let work = run_statement(conn, sql, params, shape, decode_binary);
    let outcome = timeout(deadline, work).await;
    guard.settle(outcome, "statement execution", start).await
}

/// Return the lease to the pool, or discard it when the connection may be
/// mid-statement or broken.
pub(crate) fn finish_lease(lease: ConnectionLease, error: Option<&DbError>) {
    match error {
        Some(DbError::Timeout { .. }) | Some(DbError::Connection { .. }) => lease.discard(),
        _ => drop(lease),
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Without parameters the raw (unprepared) path is used, which also admits
// statements some servers refuse to prepare.

mod mysql {
    use super::*;
    use sqlx::Statement;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_row_set(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        limit: Option<usize>,
        decode_binary: bool,
    ) -> DbResult<RowSet> {
        let cap = stream_cap(limit);
        let results = if params.is_empty() {
            (&mut *conn).fetch(sql).take(cap).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch(&mut *conn).take(cap).collect::<Vec<_>>().await
        };
        let rows: Vec<MySqlRow> = collect_rows(results)?;

        let described = if rows.is_empty() {
            describe(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(row_set_from(rows, limit, || described, decode_binary))
    }

    async fn describe(conn: &mut MySqlConnection, sql: &str) -> Vec<ColumnMetadata> {
        match conn.prepare(sql).await {
            Ok(stmt) => column_metadata(stmt.columns()),
            Err(e) => {
                debug!(error = %e, "Could not describe statement");
                Vec::new()
            }
        }
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        is_insert: bool,
    ) -> DbResult<UpdateResult> {
        // Some statements (e.g. CREATE PROCEDURE) cannot be prepared
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(conn).await?
        };

        let generated_keys = if is_insert && result.last_insert_id() != 0 {
            vec![generated_key_row(result.last_insert_id())]
        } else {
            Vec::new()
        };
        Ok(UpdateResult {
            affected_rows: result.rows_affected(),
            generated_keys,
            execution_time_ms: 0,
        })
    }
}

mod postgres {
    use super::*;
    use sqlx::Statement;
    use sqlx::postgres::PgRow;

    pub async fn fetch_row_set(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        limit: Option<usize>,
        decode_binary: bool,
    ) -> DbResult<RowSet> {
        let cap = stream_cap(limit);
        let results = if params.is_empty() {
            (&mut *conn).fetch(sql).take(cap).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch(&mut *conn).take(cap).collect::<Vec<_>>().await
        };
        let rows: Vec<PgRow> = collect_rows(results)?;

        let described = if rows.is_empty() {
            describe(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(row_set_from(rows, limit, || described, decode_binary))
    }

    async fn describe(conn: &mut PgConnection, sql: &str) -> Vec<ColumnMetadata> {
        match conn.prepare(sql).await {
            Ok(stmt) => column_metadata(stmt.columns()),
            Err(e) => {
                debug!(error = %e, "Could not describe statement");
                Vec::new()
            }
        }
    }

    /// Generated keys on PostgreSQL come only from RETURNING.
    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<UpdateResult> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(conn).await?
        };

        Ok(UpdateResult {
            affected_rows: result.rows_affected(),
            generated_keys: Vec::new(),
            execution_time_ms: 0,
        })
    }
}

mod sqlite {
    use super::*;
    use sqlx::Statement;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_row_set(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        limit: Option<usize>,
        decode_binary: bool,
    ) -> DbResult<RowSet> {
        let cap = stream_cap(limit);
        let results = if params.is_empty() {
            (&mut *conn).fetch(sql).take(cap).collect::<Vec<_>>().await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch(&mut *conn).take(cap).collect::<Vec<_>>().await
        };
        let rows: Vec<SqliteRow> = collect_rows(results)?;

        let described = if rows.is_empty() {
            describe(conn, sql).await
        } else {
            Vec::new()
        };
        Ok(row_set_from(rows, limit, || described, decode_binary))
    }

    async fn describe(conn: &mut SqliteConnection, sql: &str) -> Vec<ColumnMetadata> {
        match conn.prepare(sql).await {
            Ok(stmt) => column_metadata(stmt.columns()),
            Err(e) => {
                debug!(error = %e, "Could not describe statement");
                Vec::new()
            }
        }
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        is_insert: bool,
    ) -> DbResult<UpdateResult> {
        let result = if params.is_empty() {
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(conn).await?
        };

        let generated_keys = if is_insert && result.rows_affected() > 0 {
            vec![generated_key_row(result.last_insert_rowid())]
        } else {
            Vec::new()
        };
        Ok(UpdateResult {
            affected_rows: result.rows_affected(),
            generated_keys,
            execution_time_ms: 0,
        })
    }
}
