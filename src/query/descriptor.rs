//! Dialect-independent query descriptors and the builder that validates them.
//!
//! Builder inputs use property names; every descriptor it produces is already
//! column-resolved, so the generator never consults entity metadata.

use crate::error::{DbError, DbResult};
use crate::models::{EntityMeta, Record, Value};
use crate::query::{Direction, Filter, Query};
use serde_json::Value as JsonValue;

/// Column-resolved SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    /// Empty means `*`.
    pub columns: Vec<String>,
    pub filter: Filter,
    pub order_by: Vec<(String, Direction)>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Count {
    pub table: String,
    pub filter: Filter,
}

/// Value tuples sharing one column list.
///
/// Columns are the union of all payload keys in first-seen order. A `None`
/// cell means the payload did not mention that column.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl ValueRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: ValueRows,
    /// Columns to return per inserted row; empty for none.
    pub returning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filter: Filter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Filter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub table: String,
    pub values: ValueRows,
    pub conflict_columns: Vec<String>,
}

impl Upsert {
    /// Payload columns reassigned on conflict, in column order.
    pub fn update_columns(&self) -> impl Iterator<Item = &str> {
        self.values
            .columns
            .iter()
            .filter(|c| !self.conflict_columns.contains(c))
            .map(String::as_str)
    }
}

/// One validated operation against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryDescriptor {
    Select(Select),
    Count(Count),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Upsert(Upsert),
}

impl QueryDescriptor {
    pub fn table(&self) -> &str {
        match self {
            Self::Select(q) => &q.table,
            Self::Count(q) => &q.table,
            Self::Insert(q) => &q.table,
            Self::Update(q) => &q.table,
            Self::Delete(q) => &q.table,
            Self::Upsert(q) => &q.table,
        }
    }

    /// Short operation name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Count(_) => "count",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Upsert(_) => "upsert",
        }
    }
}

/// Validates call arguments against one entity and produces descriptors.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBuilder<'a> {
    entity: &'a EntityMeta,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(entity: &'a EntityMeta) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &'a EntityMeta {
        self.entity
    }

    pub fn select(&self, query: &Query) -> DbResult<QueryDescriptor> {
        let columns = query
            .project
            .iter()
            .map(|p| self.column(p))
            .collect::<DbResult<Vec<_>>>()?;
        let filter = self.resolve_filter(&query.read_filter())?;
        let order_by = query
            .sort
            .iter()
            .map(|k| Ok((self.column(&k.field)?, k.direction)))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(QueryDescriptor::Select(Select {
            table: self.table(),
            columns,
            filter,
            order_by,
            offset: query.skip,
            limit: query.limit,
        }))
    }

    pub fn count(&self, filter: Option<&Filter>) -> DbResult<QueryDescriptor> {
        let filter = match filter {
            Some(f) => self.resolve_filter(f)?,
            None => Filter::all(),
        };
        Ok(QueryDescriptor::Count(Count {
            table: self.table(),
            filter,
        }))
    }

    /// Multi-row insert. With `returning`, the primary-key columns are
    /// requested back for every row.
    pub fn insert(&self, payloads: &[Record], returning: bool) -> DbResult<QueryDescriptor> {
        let values = self.value_rows(payloads)?;
        let returning = if returning {
            self.entity.primary_keys().map(|c| c.column.clone()).collect()
        } else {
            Vec::new()
        };
        Ok(QueryDescriptor::Insert(Insert {
            table: self.table(),
            values,
            returning,
        }))
    }

    /// Update rows matching `filter`. A missing filter is rejected; pass
    /// [`Filter::all`] to target every row.
    pub fn update(&self, filter: Option<&Filter>, payload: &Record) -> DbResult<QueryDescriptor> {
        let filter = self.explicit_filter(filter, "update")?;
        if payload.is_empty() {
            return Err(DbError::validation("payload", "payload cannot be empty"));
        }
        let assignments = payload
            .iter()
            .map(|(property, value)| Ok((self.column(property)?, Value::from(value))))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(QueryDescriptor::Update(Update {
            table: self.table(),
            assignments,
            filter,
        }))
    }

    /// Delete rows matching `filter`. A missing filter is rejected; pass
    /// [`Filter::all`] to target every row.
    pub fn delete(&self, filter: Option<&Filter>) -> DbResult<QueryDescriptor> {
        let filter = self.explicit_filter(filter, "delete")?;
        Ok(QueryDescriptor::Delete(Delete {
            table: self.table(),
            filter,
        }))
    }

    pub fn upsert(&self, conflict_paths: &[String], payloads: &[Record]) -> DbResult<QueryDescriptor> {
        if conflict_paths.is_empty() {
            return Err(DbError::validation(
                "conflictPaths",
                "conflict paths cannot be empty",
            ));
        }
        let conflict_columns = conflict_paths
            .iter()
            .map(|p| self.column(p))
            .collect::<DbResult<Vec<_>>>()?;
        let values = self.value_rows(payloads)?;
        Ok(QueryDescriptor::Upsert(Upsert {
            table: self.table(),
            values,
            conflict_columns,
        }))
    }

    /// Primary-key equality filter in property space.
    ///
    /// Composite keys take an object holding every key property.
    pub fn id_filter(&self, id: &JsonValue) -> DbResult<Filter> {
        let keys: Vec<_> = self.entity.primary_keys().collect();
        if let [key] = keys.as_slice() {
            if id.is_null() || id.is_object() || id.is_array() {
                return Err(DbError::validation(&key.property, "id must be a scalar value"));
            }
            return Ok(Filter::eq(&key.property, id));
        }

        let object = id.as_object().ok_or_else(|| {
            DbError::validation(
                &self.entity.name,
                "composite id must be an object of key properties",
            )
        })?;
        keys.iter()
            .map(|key| match object.get(&key.property) {
                Some(v) if !v.is_null() => Ok(Filter::eq(&key.property, v)),
                _ => Err(DbError::validation(&key.property, "missing composite id part")),
            })
            .collect::<DbResult<Vec<_>>>()
            .map(Filter::And)
    }

    /// Map every field in the filter from property to column name.
    pub fn resolve_filter(&self, filter: &Filter) -> DbResult<Filter> {
        filter.map_fields(&mut |property| self.column(property))
    }

    fn explicit_filter(&self, filter: Option<&Filter>, op: &str) -> DbResult<Filter> {
        match filter {
            Some(f) => self.resolve_filter(f),
            None => Err(DbError::validation(
                "$filter",
                format!("{op} requires an explicit filter; pass an empty filter to target all rows"),
            )),
        }
    }

    fn value_rows(&self, payloads: &[Record]) -> DbResult<ValueRows> {
        if payloads.is_empty() {
            return Err(DbError::validation("payload", "payload list cannot be empty"));
        }

        let mut properties: Vec<&str> = Vec::new();
        for payload in payloads {
            if payload.is_empty() {
                return Err(DbError::validation("payload", "payload cannot be empty"));
            }
            for property in payload.keys() {
                if !properties.contains(&property.as_str()) {
                    properties.push(property);
                }
            }
        }

        let columns = properties
            .iter()
            .map(|p| self.column(p))
            .collect::<DbResult<Vec<_>>>()?;
        let rows = payloads
            .iter()
            .map(|payload| {
                properties
                    .iter()
                    .map(|p| payload.get(*p).map(Value::from))
                    .collect()
            })
            .collect();

        Ok(ValueRows { columns, rows })
    }

    fn column(&self, property: &str) -> DbResult<String> {
        self.entity.column_for(property).map(String::from)
    }

    fn table(&self) -> String {
        self.entity.table.clone()
    }
}
