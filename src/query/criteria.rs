//! Read criteria: projection, filter, sort and paging.

use crate::error::{DbError, DbResult};
use crate::query::Filter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Accepts `1`/`-1` and `"asc"`/`"desc"` in any case.
    pub fn from_json(field: &str, value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(Self::Asc),
            JsonValue::Number(n) if n.as_i64() == Some(-1) => Ok(Self::Desc),
            JsonValue::String(s) if s.eq_ignore_ascii_case("asc") => Ok(Self::Asc),
            JsonValue::String(s) if s.eq_ignore_ascii_case("desc") => Ok(Self::Desc),
            _ => Err(DbError::validation(
                field,
                "sort direction must be 1, -1, \"asc\" or \"desc\"",
            )),
        }
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Parse `{ "name": 1, "id": "desc" }` preserving key order.
pub fn sort_from_json(json: &JsonValue) -> DbResult<Vec<SortKey>> {
    let object = json
        .as_object()
        .ok_or_else(|| DbError::validation("$sort", "sort must be an object"))?;
    object
        .iter()
        .map(|(field, dir)| {
            Ok(SortKey {
                field: field.clone(),
                direction: Direction::from_json(field, dir)?,
            })
        })
        .collect()
}

/// Read criteria for an entity, expressed in property names.
///
/// `filter: None` means "no filter given". Reads treat it as match-all, but
/// `update_many`/`delete_many` reject it so that a full-table mutation always
/// requires an explicit [`Filter::all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub project: Vec<String>,
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query with only a filter set.
    pub fn filtered(filter: Filter) -> Self {
        Self::new().filter(filter)
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The filter to apply for reads: absent means every row.
    pub fn read_filter(&self) -> Filter {
        self.filter.clone().unwrap_or_default()
    }
}
