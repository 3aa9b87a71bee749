//! Database-agnostic query translation and execution.
//!
//! Entity queries are described once ([`query`]), rendered to SQL for
//! PostgreSQL, MySQL or SQLite ([`sql`]) and executed through a bounded pool of
//! connections ([`db`]).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod sql;

pub use config::Config;
pub use db::{Pool, Querier};
pub use error::{DbError, DbResult};
