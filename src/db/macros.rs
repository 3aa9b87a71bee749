//! Connection dispatch macro.
//!
//! Generates the per-driver match over [`DbConnection`](crate::db::DbConnection)
//! so that code which is identical across drivers is written once.

/// Macro for generating connection dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_conn_dispatch!(conn, c => c.ping().await)
/// ```
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::connection::DbConnection::MySql($c) => $body,
            $crate::db::connection::DbConnection::Postgres($c) => $body,
            $crate::db::connection::DbConnection::Sqlite($c) => $body,
        }
    };
}
