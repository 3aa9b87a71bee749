//! Data models for the query engine.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod entity;
pub mod query;

// Re-export commonly used types
pub use connection::{Dialect, PoolStatus, QuerierState};
pub use entity::{ColumnDef, EntityMeta, EntityRegistry};
pub use query::{ExecOutcome, RawResult, Record, Value};
