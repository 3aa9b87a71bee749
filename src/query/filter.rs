//! Filter expressions.
//!
//! A [`Filter`] is a recursive boolean tree over entity properties. The empty
//! conjunction ([`Filter::all`]) matches every row.
//!
//! # JSON encoding
//!
//! ```text
//! { "email": "a@x.com" }                   equality
//! { "deletedAt": null }                    IS NULL
//! { "id": [1, 2, 3] }                      IN
//! { "age": { "$gte": 18, "$lt": 65 } }     comparisons, AND-ed
//! { "$or": [ {...}, {...} ] }              disjunction
//! { "$and": [ {...} ], "$not": {...} }     conjunction, negation
//! ```

use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde_json::Value as JsonValue;

/// Leaf comparison applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Raw LIKE pattern; the caller supplies the wildcards.
    Like(String),
    /// Case-insensitive raw LIKE pattern.
    ILike(String),
    StartsWith(String),
    EndsWith(String),
    Includes(String),
    Regex(String),
    IsNull,
    IsNotNull,
}

impl Comparison {
    /// Operator name as used in the JSON encoding.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::In(_) => "$in",
            Self::Nin(_) => "$nin",
            Self::Like(_) => "$like",
            Self::ILike(_) => "$ilike",
            Self::StartsWith(_) => "$startsWith",
            Self::EndsWith(_) => "$endsWith",
            Self::Includes(_) => "$includes",
            Self::Regex(_) => "$regex",
            Self::IsNull => "$isNull",
            Self::IsNotNull => "$isNotNull",
        }
    }

    fn from_operator(field: &str, op: &str, value: &JsonValue) -> DbResult<Self> {
        let text = |value: &JsonValue| -> DbResult<String> {
            value.as_str().map(String::from).ok_or_else(|| {
                DbError::validation(field, format!("{op} expects a string"))
            })
        };
        let list = |value: &JsonValue| -> DbResult<Vec<Value>> {
            value
                .as_array()
                .map(|items| items.iter().map(Value::from).collect())
                .ok_or_else(|| DbError::validation(field, format!("{op} expects an array")))
        };
        let flag = |value: &JsonValue| -> DbResult<bool> {
            value
                .as_bool()
                .ok_or_else(|| DbError::validation(field, format!("{op} expects a boolean")))
        };

        Ok(match op {
            "$eq" => Self::Eq(value.into()),
            "$ne" => Self::Ne(value.into()),
            "$lt" => Self::Lt(value.into()),
            "$lte" => Self::Lte(value.into()),
            "$gt" => Self::Gt(value.into()),
            "$gte" => Self::Gte(value.into()),
            "$in" => Self::In(list(value)?),
            "$nin" => Self::Nin(list(value)?),
            "$like" => Self::Like(text(value)?),
            "$ilike" => Self::ILike(text(value)?),
            "$startsWith" => Self::StartsWith(text(value)?),
            "$endsWith" => Self::EndsWith(text(value)?),
            "$includes" => Self::Includes(text(value)?),
            "$regex" => Self::Regex(text(value)?),
            "$isNull" => {
                if flag(value)? {
                    Self::IsNull
                } else {
                    Self::IsNotNull
                }
            }
            "$isNotNull" => {
                if flag(value)? {
                    Self::IsNotNull
                } else {
                    Self::IsNull
                }
            }
            other => {
                return Err(DbError::validation(
                    field,
                    format!("unknown comparison operator '{other}'"),
                ));
            }
        })
    }
}

/// Recursive boolean predicate over entity properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Field { field: String, op: Comparison },
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl Filter {
    /// The empty predicate: matches every row.
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    pub fn field(field: impl Into<String>, op: Comparison) -> Self {
        Self::Field {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Comparison::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Comparison::Ne(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Comparison::Lt(value.into()))
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, Comparison::Gte(value.into()))
    }

    pub fn in_list<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::field(
            field,
            Comparison::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    pub fn negate(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Check whether this predicate matches every row without a WHERE clause.
    pub fn is_match_all(&self) -> bool {
        match self {
            Self::And(children) => children.iter().all(Filter::is_match_all),
            _ => false,
        }
    }

    /// Rewrite every field name, e.g. from property to column.
    pub fn map_fields<F>(&self, f: &mut F) -> DbResult<Filter>
    where
        F: FnMut(&str) -> DbResult<String>,
    {
        Ok(match self {
            Self::And(children) => Self::And(
                children
                    .iter()
                    .map(|c| c.map_fields(f))
                    .collect::<DbResult<_>>()?,
            ),
            Self::Or(children) => Self::Or(
                children
                    .iter()
                    .map(|c| c.map_fields(f))
                    .collect::<DbResult<_>>()?,
            ),
            Self::Not(inner) => Self::Not(Box::new(inner.map_fields(f)?)),
            Self::Field { field, op } => Self::Field {
                field: f(field)?,
                op: op.clone(),
            },
        })
    }

    /// Parse the JSON encoding described in the module docs.
    pub fn from_json(json: &JsonValue) -> DbResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| DbError::validation("$filter", "filter must be an object"))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            match key.as_str() {
                "$and" => clauses.push(Self::And(Self::list_from_json(key, value)?)),
                "$or" => clauses.push(Self::Or(Self::list_from_json(key, value)?)),
                "$not" => clauses.push(Self::Not(Box::new(Self::from_json(value)?))),
                op if op.starts_with('$') => {
                    return Err(DbError::validation(
                        op,
                        "unknown logical operator in filter",
                    ));
                }
                field => clauses.extend(Self::field_from_json(field, value)?),
            }
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Self::And(clauses),
        })
    }

    fn list_from_json(key: &str, value: &JsonValue) -> DbResult<Vec<Filter>> {
        value
            .as_array()
            .ok_or_else(|| DbError::validation(key, "expects an array of filters"))?
            .iter()
            .map(Self::from_json)
            .collect()
    }

    fn field_from_json(field: &str, value: &JsonValue) -> DbResult<Vec<Filter>> {
        match value {
            JsonValue::Null => Ok(vec![Self::field(field, Comparison::IsNull)]),
            JsonValue::Array(items) => Ok(vec![Self::field(
                field,
                Comparison::In(items.iter().map(Value::from).collect()),
            )]),
            JsonValue::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops
                .iter()
                .map(|(op, v)| Comparison::from_operator(field, op, v).map(|c| Self::field(field, c)))
                .collect(),
            other => Ok(vec![Self::eq(field, other)]),
        }
    }
}
