//! Backend dispatch macros.
//!
//! Pools and leased connections are enums with one variant per backend. The
//! macros here expand to the `match` over those variants so that callers can
//! write the three arms side by side without restating the enum paths.

/// Dispatch over the variants of [`DbPool`](crate::db::pool::DbPool).
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
///
/// With a `lease:` prefix the match is over
/// [`LeasedConnection`](crate::db::pool::LeasedConnection) instead:
///
/// ```ignore
/// impl_db_dispatch!(lease: lease.connection_mut()?, {
///     MySql(c) => run_mysql(&mut **c).await,
///     Postgres(c) => run_postgres(&mut **c).await,
///     SQLite(c) => run_sqlite(&mut **c).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    (lease: $conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::pool::LeasedConnection::$variant($c) => $body,
            )+
        }
    };
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
