//! Cancellation of statements that outlive their deadline.
//!
//! Dropping a statement future only stops the client from waiting: the
//! SQLite worker thread and the PostgreSQL/MySQL server keep executing, and
//! an autocommit write still commits. A [`StatementGuard`] is armed on the
//! lease before the statement starts and stops it for real when the
//! deadline passes:
//!
//! - SQLite: a progress handler aborts the running VM once the deadline is
//!   reached, which rolls the statement back.
//! - PostgreSQL: `pg_cancel_backend(pid)` is sent from a separate connection.
//! - MySQL: `KILL QUERY <id>` is sent from a separate connection.
//!
//! The side connection is opened with the pool's connect options rather
//! than taken from the pool, so cancelling works when the pool is full.

use crate::db::pool::{ConnectionLease, DbPool, LeasedConnection};
use crate::error::{DbError, DbResult};
use sqlx::{Connection, Executor, MySqlConnection, PgConnection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, warn};

/// Upper bound on opening the side connection and sending the cancel.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Deadline shared with a SQLite progress handler.
#[derive(Debug)]
pub(crate) struct Interrupt {
    expires_at: Instant,
    cancelled: AtomicBool,
    tripped: AtomicBool,
}

impl Interrupt {
    /// Progress handler body: `false` aborts the running statement.
    fn keep_running(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) || Instant::now() >= self.expires_at {
            self.tripped.store(true, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Armed for the lifetime of one statement (or one transaction unit).
#[derive(Debug)]
pub(crate) enum StatementGuard {
    MySql { thread_id: u64, pool: DbPool },
    Postgres { pid: i32, pool: DbPool },
    SQLite { interrupt: Arc<Interrupt> },
}

impl StatementGuard {
    /// Prepare to cancel whatever runs next on `lease` within `deadline`.
    ///
    /// PostgreSQL and MySQL pay one round trip here to learn the server-side
    /// id of the leased connection.
    pub(crate) async fn arm(lease: &mut ConnectionLease, deadline: Duration) -> DbResult<Self> {
        let pool = lease.pool().clone();
        match lease.connection_mut()? {
            LeasedConnection::MySql(c) => {
                let thread_id = sqlx::query_scalar::<_, u64>("SELECT CONNECTION_ID()")
                    .fetch_one(&mut **c)
                    .await?;
                Ok(Self::MySql { thread_id, pool })
            }
            LeasedConnection::Postgres(c) => {
                let pid = sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
                    .fetch_one(&mut **c)
                    .await?;
                Ok(Self::Postgres { pid, pool })
            }
            LeasedConnection::SQLite(c) => {
                let interrupt = Arc::new(Interrupt {
                    expires_at: Instant::now() + deadline,
                    cancelled: AtomicBool::new(false),
                    tripped: AtomicBool::new(false),
                });
                // The handler outlives the guard on a pooled connection; once
                // the guard is gone it lets everything run.
                let weak: Weak<Interrupt> = Arc::downgrade(&interrupt);
                let mut handle = c.lock_handle().await?;
                handle.set_progress_handler(PROGRESS_INTERVAL, move || {
                    weak.upgrade().is_none_or(|i| i.keep_running())
                });
                Ok(Self::SQLite { interrupt })
            }
        }
    }

    /// Whether the SQLite progress handler aborted a statement.
    pub(crate) fn tripped(&self) -> bool {
        match self {
            Self::SQLite { interrupt } => interrupt.tripped.load(Ordering::Relaxed),
            _ => false,
        }
    }

    /// Stop the statement running on the guarded connection. Failures are
    /// logged; the lease is discarded by the caller either way.
    pub(crate) async fn cancel(&self) {
        let sent = match self {
            Self::SQLite { interrupt } => {
                interrupt.cancelled.store(true, Ordering::Relaxed);
                return;
            }
            Self::Postgres { pid, pool } => {
                timeout(CANCEL_TIMEOUT, cancel_postgres(pool, *pid)).await
            }
            Self::MySql { thread_id, pool } => {
                timeout(CANCEL_TIMEOUT, cancel_mysql(pool, *thread_id)).await
            }
        };
        match sent {
            Ok(Ok(())) => debug!(backend_id = ?self.backend_id(), "Cancel sent"),
            Ok(Err(e)) => warn!(backend_id = ?self.backend_id(), error = %e, "Cancel failed"),
            Err(_) => warn!(backend_id = ?self.backend_id(), "Cancel timed out"),
        }
    }

    /// Fold a deadline-bounded outcome into a result, cancelling on expiry.
    ///
    /// An error raised because the SQLite handler aborted the statement is
    /// reported as a timeout too.
    pub(crate) async fn settle<T>(
        &self,
        outcome: Result<DbResult<T>, Elapsed>,
        operation: &str,
        start: Instant,
    ) -> DbResult<T> {
        match outcome {
            Ok(Err(_)) if self.tripped() => Err(DbError::timeout(
                operation,
                start.elapsed().as_millis() as u64,
            )),
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.cancel().await;
                Err(DbError::timeout(operation, elapsed_ms))
            }
        }
    }

    fn backend_id(&self) -> Option<u64> {
        match self {
            Self::MySql { thread_id, .. } => Some(*thread_id),
            Self::Postgres { pid, .. } => Some(*pid as u64),
            Self::SQLite { .. } => None,
        }
    }
}

async fn cancel_postgres(pool: &DbPool, pid: i32) -> Result<(), sqlx::Error> {
    let DbPool::Postgres(p) = pool else {
        return Ok(());
    };
    let mut conn = PgConnection::connect_with(&p.connect_options()).await?;
    sqlx::query("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .execute(&mut conn)
        .await?;
    conn.close().await
}

async fn cancel_mysql(pool: &DbPool, thread_id: u64) -> Result<(), sqlx::Error> {
    let DbPool::MySql(p) = pool else {
        return Ok(());
    };
    let mut conn = MySqlConnection::connect_with(&p.connect_options()).await?;
    // KILL takes no placeholders; the id is a server-issued integer
    (&mut conn)
        .execute(format!("KILL QUERY {thread_id}").as_str())
        .await?;
    conn.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_trips_after_deadline() {
        let live = Interrupt {
            expires_at: Instant::now() + Duration::from_secs(60),
            cancelled: AtomicBool::new(false),
            tripped: AtomicBool::new(false),
        };
        assert!(live.keep_running());
        assert!(!live.tripped.load(Ordering::Relaxed));

        live.cancelled.store(true, Ordering::Relaxed);
        assert!(!live.keep_running());
        assert!(live.tripped.load(Ordering::Relaxed));

        let expired = Interrupt {
            expires_at: Instant::now(),
            cancelled: AtomicBool::new(false),
            tripped: AtomicBool::new(false),
        };
        assert!(!expired.keep_running());
    }

    #[tokio::test]
    async fn test_settle_maps_tripped_error_to_timeout() {
        let guard = StatementGuard::SQLite {
            interrupt: Arc::new(Interrupt {
                expires_at: Instant::now(),
                cancelled: AtomicBool::new(false),
                tripped: AtomicBool::new(true),
            }),
        };
        let result: DbResult<()> = guard
            .settle(
                Ok(Err(DbError::internal("interrupted"))),
                "statement execution",
                Instant::now(),
            )
            .await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));

        let ok: DbResult<u8> = guard
            .settle(Ok(Ok(7)), "statement execution", Instant::now())
            .await;
        assert_eq!(ok.unwrap(), 7);
    }
}
