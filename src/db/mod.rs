//! Database layer.
//!
//! - [`DbConnection`]: one driver connection per dialect
//! - [`Pool`] and [`Lease`]: bounded connection reuse
//! - [`Querier`]: entity operations, raw SQL and transactions on a lease
//! - Row decoding and parameter binding per driver

#[macro_use]
pub mod macros;
pub mod connection;
pub mod params;
pub mod pool;
pub mod querier;
pub mod types;

pub use connection::DbConnection;
pub use pool::{Lease, Pool};
pub use querier::Querier;
