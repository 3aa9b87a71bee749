//! RPC encoding of a read query.
//!
//! ```json
//! {
//!   "$entity": "User",
//!   "$project": ["id", "name"],
//!   "$filter": { "name": "A" },
//!   "$sort": { "id": -1 },
//!   "$skip": 10,
//!   "$limit": 5
//! }
//! ```
//!
//! [`RpcQuery::into_parts`] yields exactly the [`Query`] that the equivalent
//! builder calls would produce, so both forms generate identical statements.

use crate::error::{DbError, DbResult};
use crate::query::{Filter, Query, sort_from_json};
use serde_json::Value as JsonValue;

/// Parsed `{ $entity, ...query }` object.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcQuery {
    pub entity: Option<String>,
    pub query: Query,
}

impl RpcQuery {
    pub fn from_json(json: &JsonValue) -> DbResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| DbError::validation("query", "query must be a JSON object"))?;

        let mut rpc = Self {
            entity: None,
            query: Query::new(),
        };

        for (key, value) in object {
            match key.as_str() {
                "$entity" => {
                    let name = value
                        .as_str()
                        .ok_or_else(|| DbError::validation(key, "must be a string"))?;
                    rpc.entity = Some(name.to_string());
                }
                "$project" => rpc.query.project = parse_project(value)?,
                "$filter" => rpc.query.filter = Some(Filter::from_json(value)?),
                "$sort" => rpc.query.sort = sort_from_json(value)?,
                "$skip" => rpc.query.skip = Some(parse_count(key, value)?),
                "$limit" => rpc.query.limit = Some(parse_count(key, value)?),
                other => {
                    return Err(DbError::validation(other, "unknown query key"));
                }
            }
        }

        Ok(rpc)
    }

    /// Parse from a JSON string.
    pub fn parse(text: &str) -> DbResult<Self> {
        let json: JsonValue = serde_json::from_str(text)
            .map_err(|e| DbError::validation("query", format!("invalid JSON: {e}")))?;
        Self::from_json(&json)
    }

    /// Split into entity name and query; the entity is required here.
    pub fn into_parts(self) -> DbResult<(String, Query)> {
        let entity = self
            .entity
            .ok_or_else(|| DbError::validation("$entity", "entity is required"))?;
        Ok((entity, self.query))
    }
}

/// `["a", "b"]` or `{ "a": true, "b": 1 }`; falsy object entries are skipped.
fn parse_project(value: &JsonValue) -> DbResult<Vec<String>> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| DbError::validation("$project", "entries must be strings"))
            })
            .collect(),
        JsonValue::Object(fields) => Ok(fields
            .iter()
            .filter(|(_, on)| is_truthy(on))
            .map(|(field, _)| field.clone())
            .collect()),
        _ => Err(DbError::validation(
            "$project",
            "must be an array or an object",
        )),
    }
}

/// Conflict paths as a list or as a `{ "email": true }` object.
pub fn conflict_paths_from_json(value: &JsonValue) -> DbResult<Vec<String>> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    DbError::validation("conflictPaths", "entries must be strings")
                })
            })
            .collect(),
        JsonValue::Object(fields) => Ok(fields
            .iter()
            .filter(|(_, on)| is_truthy(on))
            .map(|(field, _)| field.clone())
            .collect()),
        _ => Err(DbError::validation(
            "conflictPaths",
            "must be an array or an object",
        )),
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64() != Some(0),
        _ => false,
    }
}

fn parse_count(key: &str, value: &JsonValue) -> DbResult<u64> {
    match value.as_i64() {
        Some(n) if n < 0 => Err(DbError::validation(key, "must not be negative")),
        Some(n) => Ok(n as u64),
        None => value
            .as_u64()
            .ok_or_else(|| DbError::validation(key, "must be a non-negative integer")),
    }
}
