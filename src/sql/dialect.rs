//! Per-dialect capability set.
//!
//! Every syntax difference the generator cares about is answered here, so the
//! generator itself is a single code path over a closed set of dialects.

use crate::models::Dialect;

impl Dialect {
    /// Identifier quote character.
    pub fn quote_char(&self) -> char {
        match self {
            Self::MySql => '`',
            Self::Postgres | Self::Sqlite => '"',
        }
    }

    /// Placeholder for the `index`-th (1-based) bound parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    pub fn supports_returning(&self) -> bool {
        matches!(self, Self::Postgres | Self::Sqlite)
    }

    /// Whether `DEFAULT` may appear inside a VALUES tuple.
    pub fn supports_default_in_values(&self) -> bool {
        matches!(self, Self::Postgres | Self::MySql)
    }

    pub fn supports_regex(&self) -> bool {
        matches!(self, Self::Postgres | Self::MySql)
    }

    pub fn supports_ilike(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Clause appended after a LIKE whose pattern was escaped with `\`.
    ///
    /// MySQL and Postgres already treat `\` as the LIKE escape; SQLite has no
    /// default escape character.
    pub fn like_escape_clause(&self) -> &'static str {
        match self {
            Self::Sqlite => " ESCAPE '\\'",
            Self::Postgres | Self::MySql => "",
        }
    }

    /// LIMIT value meaning "no limit" for dialects that cannot express OFFSET alone.
    pub fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            Self::Postgres => None,
            Self::MySql => Some("18446744073709551615"),
            Self::Sqlite => Some("-1"),
        }
    }

    pub fn begin_statement(&self) -> &'static str {
        match self {
            Self::MySql => "START TRANSACTION",
            Self::Postgres | Self::Sqlite => "BEGIN",
        }
    }

    /// Reference to the proposed row's value inside an upsert's update clause.
    pub fn proposed_value(&self, quoted_column: &str) -> String {
        match self {
            Self::MySql => format!("VALUES({quoted_column})"),
            Self::Postgres | Self::Sqlite => format!("EXCLUDED.{quoted_column}"),
        }
    }
}
