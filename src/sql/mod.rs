//! Dialect generator.
//!
//! [`SqlGenerator`] turns column-resolved [`QueryDescriptor`](crate::query::QueryDescriptor)s
//! into [`Statement`]s with dialect-correct quoting and placeholders.

pub mod classify;
pub mod dialect;
pub mod generator;
pub mod writer;

pub use classify::returns_rows;
pub use generator::{SqlGenerator, escape_like};
pub use writer::{SqlWriter, Statement, quote_ident};
