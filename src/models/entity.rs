//! Entity metadata and the explicit entity registry.
//!
//! An entity is a named record shape mapped to one table. Records use property
//! names; generated SQL uses column names. The registry is populated once at
//! startup and consumed read-only afterwards.

use crate::error::{DbError, DbResult};
use crate::models::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One mapped column of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawColumnDef")]
pub struct ColumnDef {
    /// Property name used in records.
    pub property: String,
    /// Column name used in SQL.
    pub column: String,
    pub primary_key: bool,
}

#[derive(Deserialize)]
struct RawColumnDef {
    property: String,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    primary_key: bool,
}

impl From<RawColumnDef> for ColumnDef {
    fn from(raw: RawColumnDef) -> Self {
        Self {
            column: raw.column.unwrap_or_else(|| raw.property.clone()),
            property: raw.property,
            primary_key: raw.primary_key,
        }
    }
}

impl ColumnDef {
    /// A column whose name equals the property name.
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self {
            column: property.clone(),
            property,
            primary_key: false,
        }
    }

    /// A primary-key column whose name equals the property name.
    pub fn primary(property: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(property)
        }
    }

    /// Override the column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

/// Table-level metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntityMeta")]
pub struct EntityMeta {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Deserialize)]
struct RawEntityMeta {
    name: String,
    #[serde(default)]
    table: Option<String>,
    columns: Vec<ColumnDef>,
}

impl From<RawEntityMeta> for EntityMeta {
    fn from(raw: RawEntityMeta) -> Self {
        Self {
            table: raw.table.unwrap_or_else(|| raw.name.clone()),
            name: raw.name,
            columns: raw.columns,
        }
    }
}

impl EntityMeta {
    /// Create entity metadata whose table name equals the entity name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            columns: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Append a column definition.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Check the structural invariants: at least one column, at least one
    /// primary-key column, and unique property and column names.
    pub fn validate(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::validation("name", "entity name cannot be empty"));
        }
        if self.columns.is_empty() {
            return Err(DbError::validation(
                &self.name,
                "entity must declare at least one column",
            ));
        }
        if !self.columns.iter().any(|c| c.primary_key) {
            return Err(DbError::validation(
                &self.name,
                "entity must declare a primary key",
            ));
        }
        let mut properties = HashSet::new();
        let mut columns = HashSet::new();
        for col in &self.columns {
            if !properties.insert(col.property.as_str()) {
                return Err(DbError::validation(
                    &col.property,
                    format!("duplicate property on {}", self.name),
                ));
            }
            if !columns.insert(col.column.as_str()) {
                return Err(DbError::validation(
                    &col.column,
                    format!("duplicate column on {}", self.name),
                ));
            }
        }
        Ok(())
    }

    /// Look up a column by property name.
    pub fn field(&self, property: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.property == property)
    }

    /// Resolve a property to its column name, failing with a validation error
    /// that names the property.
    pub fn column_for(&self, property: &str) -> DbResult<&str> {
        self.field(property)
            .map(|c| c.column.as_str())
            .ok_or_else(|| {
                DbError::validation(property, format!("unknown property on {}", self.name))
            })
    }

    /// Resolve a column name back to its property name.
    pub fn property_for(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.property.as_str())
    }

    /// Primary-key columns in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn is_composite_key(&self) -> bool {
        self.primary_keys().count() > 1
    }

    /// Extract the primary-key value of a record, if every key property is set.
    ///
    /// Simple keys yield the scalar value; composite keys yield an object of
    /// key properties.
    pub fn id_of(&self, record: &Record) -> Option<JsonValue> {
        let mut key = Record::new();
        for pk in self.primary_keys() {
            match record.get(&pk.property) {
                Some(v) if !v.is_null() => {
                    key.insert(pk.property.clone(), v.clone());
                }
                _ => return None,
            }
        }
        if key.len() == 1 {
            key.into_iter().next().map(|(_, v)| v)
        } else {
            Some(JsonValue::Object(key))
        }
    }

    /// Map a column-keyed driver row to a property-keyed record.
    ///
    /// Columns that are not mapped (computed expressions, aliases) pass through
    /// under their own name.
    pub fn to_record(&self, row: Record) -> Record {
        row.into_iter()
            .map(|(column, value)| {
                let key = self
                    .property_for(&column)
                    .map(String::from)
                    .unwrap_or(column);
                (key, value)
            })
            .collect()
    }
}

/// Registry of entity metadata keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityMeta>>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register an entity. Re-registering a name is rejected.
    pub fn register(&mut self, meta: EntityMeta) -> DbResult<()> {
        meta.validate()?;
        if self.entities.contains_key(&meta.name) {
            return Err(DbError::validation(
                &meta.name,
                "entity is already registered",
            ));
        }
        self.entities.insert(meta.name.clone(), Arc::new(meta));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, meta: EntityMeta) -> DbResult<Self> {
        self.register(meta)?;
        Ok(self)
    }

    /// Load a registry from a JSON array of entity definitions.
    pub fn from_json(json: &str) -> DbResult<Self> {
        let metas: Vec<EntityMeta> = serde_json::from_str(json)
            .map_err(|e| DbError::validation("entities", format!("invalid definition: {e}")))?;
        let mut registry = Self::new();
        for meta in metas {
            registry.register(meta)?;
        }
        Ok(registry)
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> DbResult<Arc<EntityMeta>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::validation("$entity", format!("unknown entity '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
