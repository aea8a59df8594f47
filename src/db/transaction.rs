//! Atomic execution of an ordered statement list.
//!
//! A unit runs on one leased connection inside one database transaction.
//! Either every statement commits or none does: the first failure rolls the
//! transaction back before the error is returned.

use crate::db::cancel::StatementGuard;
use crate::db::executor::{
    ConnRef, ResultShape, finish_lease, record_event, result_rows, run_statement,
    statement_outcome,
};
use crate::db::pool::{ConnectionPolicy, ConnectionRegistry, LeasedConnection};
use crate::db::validator::{QueryValidator, ValidatedStatement, Verb};
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, IsolationLevel, QueryResult, TransactionOptions, TransactionResult,
    TransactionStatement,
};
use sqlx::{Connection, Executor, MySql, Postgres, Sqlite, Transaction};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
pub(crate) enum DbTransaction<'c> {
    MySql(Transaction<'c, MySql>),
    Postgres(Transaction<'c, Postgres>),
    SQLite(Transaction<'c, Sqlite>),
}

impl<'c> DbTransaction<'c> {
    /// BEGIN on the leased connection, applying `isolation` where the
    /// backend wants it: before BEGIN on MySQL, after it on PostgreSQL.
    pub(crate) async fn begin(
        conn: &'c mut LeasedConnection,
        isolation: Option<IsolationLevel>,
    ) -> DbResult<Self> {
        let set_isolation =
            isolation.map(|level| format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));

        match conn {
            LeasedConnection::MySql(c) => {
                if let Some(sql) = &set_isolation {
                    (&mut **c).execute(sql.as_str()).await?;
                }
                Ok(DbTransaction::MySql(Connection::begin(&mut **c).await?))
            }
            LeasedConnection::Postgres(c) => {
                let mut tx = Connection::begin(&mut **c).await?;
                if let Some(sql) = &set_isolation {
                    (&mut *tx).execute(sql.as_str()).await?;
                }
                Ok(DbTransaction::Postgres(tx))
            }
            // SQLite transactions are always serializable
            LeasedConnection::SQLite(c) => {
                Ok(DbTransaction::SQLite(Connection::begin(&mut **c).await?))
            }
        }
    }

    pub(crate) fn conn(&mut self) -> ConnRef<'_> {
        match self {
            DbTransaction::MySql(tx) => ConnRef::MySql(&mut **tx),
            DbTransaction::Postgres(tx) => ConnRef::Postgres(&mut **tx),
            DbTransaction::SQLite(tx) => ConnRef::SQLite(&mut **tx),
        }
    }

    pub(crate) async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    pub(crate) async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}

/// A failed unit. `discard` is set when the connection's transaction state
/// is unknown (the rollback itself failed).
struct UnitFailure {
    error: DbError,
    discard: bool,
}

impl From<DbError> for UnitFailure {
    fn from(error: DbError) -> Self {
        Self {
            error,
            discard: false,
        }
    }
}

/// Runs statement lists atomically.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    registry: ConnectionRegistry,
    validator: QueryValidator,
}

impl TransactionCoordinator {
    pub fn new(registry: ConnectionRegistry) -> Self {
        let validator = QueryValidator::new(registry.security());
        Self {
            registry,
            validator,
        }
    }

    /// Execute `statements` in order inside one transaction.
    ///
    /// Every statement is validated before a connection is taken. The
    /// timeout covers the whole unit; when it fires the running statement is
    /// cancelled, the connection is discarded and the server rolls back on
    /// disconnect.
    pub async fn execute_transaction(
        &self,
        connection_id: &str,
        statements: &[TransactionStatement],
        options: &TransactionOptions,
    ) -> DbResult<TransactionResult> {
        if statements.is_empty() {
            return Err(DbError::invalid_input(
                "Transaction requires at least one statement",
            ));
        }

        let policy = self.registry.policy(connection_id).await?;
        let validated = statements
            .iter()
            .map(|s| self.validator.validate(&s.sql, policy.validation_mode()))
            .collect::<DbResult<Vec<_>>>()?;

        if let Some(stmt) = validated.iter().find(|v| {
            matches!(v.verb, Verb::Begin | Verb::Commit | Verb::Rollback)
        }) {
            return Err(DbError::invalid_input(format!(
                "{} cannot be used inside a transaction unit; the coordinator manages transaction boundaries",
                stmt.verb
            )));
        }

        if policy.db_type == DatabaseType::SQLite
            && options
                .isolation
                .is_some_and(|level| level != IsolationLevel::Serializable)
        {
            return Err(DbError::invalid_input(
                "SQLite only supports SERIALIZABLE isolation",
            ));
        }

        let deadline = policy.timeout_for(options.timeout);
        info!(
            connection_id = %connection_id,
            statements = statements.len(),
            isolation = ?options.isolation,
            timeout_ms = deadline.as_millis() as u64,
            "Starting transaction"
        );

        let mut lease = self.registry.acquire(connection_id).await?;
        let start = Instant::now();
        let guard = match StatementGuard::arm(&mut lease, deadline).await {
            Ok(guard) => guard,
            Err(e) => {
                finish_lease(lease, Some(&e));
                return Err(e);
            }
        };
        let unit = async {
            match lease.connection_mut() {
                Ok(conn) => {
                    self.run_unit(conn, &policy, statements, &validated, options.isolation)
                        .await
                }
                Err(e) => Err(UnitFailure::from(e)),
            }
        };

        let outcome = match timeout(deadline, unit).await {
            // the statement the handler aborted has already been rolled back
            Ok(Err(_)) if guard.tripped() => None,
            Ok(outcome) => Some(outcome),
            Err(_) => {
                guard.cancel().await;
                None
            }
        };
        let Some(outcome) = outcome else {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            warn!(connection_id = %connection_id, elapsed_ms, "Transaction timed out");
            lease.discard();
            return Err(DbError::timeout("transaction", elapsed_ms));
        };

        match outcome {
            Ok(results) => {
                let affected_rows = results.iter().filter_map(|r| r.affected_rows()).sum();
                let execution_time_ms = start.elapsed().as_millis() as u64;
                info!(
                    connection_id = %connection_id,
                    affected_rows,
                    execution_time_ms,
                    "Transaction committed"
                );
                Ok(TransactionResult {
                    success: true,
                    statement_count: results.len(),
                    affected_rows,
                    results,
                    execution_time_ms,
                })
            }
            Err(failure) => {
                if failure.discard {
                    lease.discard();
                }
                Err(failure.error)
            }
        }
    }

    async fn run_unit(
        &self,
        conn: &mut LeasedConnection,
        policy: &ConnectionPolicy,
        statements: &[TransactionStatement],
        validated: &[ValidatedStatement],
        isolation: Option<IsolationLevel>,
    ) -> Result<Vec<QueryResult>, UnitFailure> {
        let row_limit = self.registry.security().max_rows as usize;
        let mut tx = DbTransaction::begin(conn, isolation).await?;
        let mut results = Vec::with_capacity(statements.len());

        for (index, (stmt, checked)) in statements.iter().zip(validated).enumerate() {
            let shape = ResultShape::of(checked, row_limit);
            let start = Instant::now();
            let result = run_statement(tx.conn(), &stmt.sql, &stmt.params, shape, false).await;

            record_event(
                self.registry.sink().as_ref(),
                &policy.connection_id,
                checked.verb.clone(),
                &stmt.sql,
                stmt.params.len(),
                start.elapsed(),
                statement_outcome(&result, result_rows),
            );

            match result {
                Ok(r) => results.push(r),
                Err(error) => {
                    warn!(
                        connection_id = %policy.connection_id,
                        statement_index = index,
                        code = error.code(),
                        "Statement failed, rolling back"
                    );
                    return match tx.rollback().await {
                        Ok(()) => Err(error.into()),
                        Err(rollback_error) => {
                            warn!(
                                connection_id = %policy.connection_id,
                                error = %rollback_error,
                                "Rollback failed"
                            );
                            Err(UnitFailure {
                                error,
                                discard: true,
                            })
                        }
                    };
                }
            }
        }

        tx.commit().await?;
        debug!(connection_id = %policy.connection_id, "Commit complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::models::ConnectionConfig;

    async fn coordinator() -> TransactionCoordinator {
        let registry = ConnectionRegistry::new(SecurityConfig::default());
        registry
            .add(ConnectionConfig::sqlite("mem", ":memory:"))
            .await
            .unwrap();
        TransactionCoordinator::new(registry)
    }

    #[tokio::test]
    async fn test_empty_transaction_rejected() {
        let coordinator = coordinator().await;
        let result = coordinator
            .execute_transaction("mem", &[], &TransactionOptions::default())
            .await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_validation_happens_before_execution() {
        let coordinator = coordinator().await;
        let statements = vec![
            TransactionStatement::new("SELECT 1"),
            TransactionStatement::new("DROP TABLE users"),
        ];
        let result = coordinator
            .execute_transaction("mem", &statements, &TransactionOptions::default())
            .await;
        assert!(matches!(result, Err(DbError::SecurityValidation { .. })));
    }

    #[tokio::test]
    async fn test_sqlite_rejects_non_serializable_isolation() {
        let coordinator = coordinator().await;
        let statements = vec![TransactionStatement::new("SELECT 1")];
        let options = TransactionOptions::default().with_isolation(IsolationLevel::ReadCommitted);
        let result = coordinator
            .execute_transaction("mem", &statements, &options)
            .await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));

        let options = TransactionOptions::default().with_isolation(IsolationLevel::Serializable);
        let result = coordinator
            .execute_transaction("mem", &statements, &options)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.statement_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let coordinator = coordinator().await;
        let statements = vec![TransactionStatement::new("SELECT 1")];
        let result = coordinator
            .execute_transaction("missing", &statements, &TransactionOptions::default())
            .await;
        assert!(matches!(result, Err(DbError::ConnectionNotFound { .. })));
    }
}
