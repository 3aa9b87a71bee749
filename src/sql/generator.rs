//! Descriptor to SQL translation.
//!
//! Values from filters and payloads are only ever emitted through
//! [`SqlWriter::bind`]. The only literals that appear in generated text are
//! fixed tokens (`1 = 0`, LIMIT numbers, the LIKE escape character).

use crate::error::{DbError, DbResult};
use crate::models::{Dialect, Value};
use crate::query::{
    Comparison, Count, Delete, Filter, Insert, QueryDescriptor, Select, Update, Upsert, ValueRows,
};
use crate::sql::writer::{SqlWriter, Statement, quote_ident};

/// Generates statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlGenerator {
    dialect: Dialect,
}

impl SqlGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn generate(&self, descriptor: &QueryDescriptor) -> DbResult<Statement> {
        match descriptor {
            QueryDescriptor::Select(q) => self.select(q),
            QueryDescriptor::Count(q) => self.count(q),
            QueryDescriptor::Insert(q) => self.insert(q),
            QueryDescriptor::Update(q) => self.update(q),
            QueryDescriptor::Delete(q) => self.delete(q),
            QueryDescriptor::Upsert(q) => self.upsert(q),
        }
    }

    pub fn select(&self, q: &Select) -> DbResult<Statement> {
        let mut w = SqlWriter::new(self.dialect);
        w.push("SELECT ");
        if q.columns.is_empty() {
            w.push("*");
        } else {
            w.ident_list(q.columns.iter().map(String::as_str));
        }
        w.push(" FROM ").ident(&q.table);
        self.write_where(&mut w, &q.filter)?;

        if !q.order_by.is_empty() {
            w.push(" ORDER BY ");
            for (i, (column, direction)) in q.order_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.ident(column).push(" ").push(direction.as_sql());
            }
        }

        self.write_limit(&mut w, q.limit, q.offset);
        Ok(w.finish(true))
    }

    pub fn count(&self, q: &Count) -> DbResult<Statement> {
        let mut w = SqlWriter::new(self.dialect);
        w.push("SELECT COUNT(*) AS ")
            .ident("count")
            .push(" FROM ")
            .ident(&q.table);
        self.write_where(&mut w, &q.filter)?;
        Ok(w.finish(true))
    }

    pub fn insert(&self, q: &Insert) -> DbResult<Statement> {
        if !q.returning.is_empty() && !self.dialect.supports_returning() {
            return Err(DbError::unsupported(self.dialect, "RETURNING clause"));
        }

        let mut w = SqlWriter::new(self.dialect);
        self.write_insert(&mut w, &q.table, &q.values)?;

        if !q.returning.is_empty() {
            w.push(" RETURNING ")
                .ident_list(q.returning.iter().map(String::as_str));
        }
        Ok(w.finish(!q.returning.is_empty()))
    }

    pub fn update(&self, q: &Update) -> DbResult<Statement> {
        if q.assignments.is_empty() {
            return Err(DbError::validation("payload", "payload cannot be empty"));
        }

        let mut w = SqlWriter::new(self.dialect);
        w.push("UPDATE ").ident(&q.table).push(" SET ");
        for (i, (column, value)) in q.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(column).push(" = ").bind(value.clone());
        }
        self.write_where(&mut w, &q.filter)?;
        Ok(w.finish(false))
    }

    pub fn delete(&self, q: &Delete) -> DbResult<Statement> {
        let mut w = SqlWriter::new(self.dialect);
        w.push("DELETE FROM ").ident(&q.table);
        self.write_where(&mut w, &q.filter)?;
        Ok(w.finish(false))
    }

    /// INSERT with every payload column, followed by the dialect's conflict
    /// clause. Non-conflict columns take the proposed value; when there are
    /// none, the first conflict column is assigned to itself so the clause stays
    /// valid.
    pub fn upsert(&self, q: &Upsert) -> DbResult<Statement> {
        let Some(first_conflict) = q.conflict_columns.first() else {
            return Err(DbError::validation(
                "conflictPaths",
                "conflict paths cannot be empty",
            ));
        };

        let mut w = SqlWriter::new(self.dialect);
        self.write_insert(&mut w, &q.table, &q.values)?;

        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => {
                w.push(" ON CONFLICT (")
                    .ident_list(q.conflict_columns.iter().map(String::as_str))
                    .push(") DO UPDATE SET ");
            }
            Dialect::MySql => {
                w.push(" ON DUPLICATE KEY UPDATE ");
            }
        }

        let mut targets: Vec<&str> = q.update_columns().collect();
        if targets.is_empty() {
            targets.push(first_conflict);
        }
        for (i, column) in targets.into_iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            let quoted = quote_ident(self.dialect, column);
            let proposed = self.dialect.proposed_value(&quoted);
            w.push(&quoted).push(" = ").push(&proposed);
        }

        Ok(w.finish(false))
    }

    /// Rows that leave a column out get `DEFAULT`. Dialects without `DEFAULT`
    /// inside VALUES cannot express that, so every row must set every column.
    fn write_insert(&self, w: &mut SqlWriter, table: &str, values: &ValueRows) -> DbResult<()> {
        if !self.dialect.supports_default_in_values() {
            for row in &values.rows {
                if let Some(j) = row.iter().position(Option::is_none) {
                    return Err(DbError::validation(
                        &values.columns[j],
                        format!(
                            "every row of a multi-row insert must set this column on {}",
                            self.dialect
                        ),
                    ));
                }
            }
        }

        w.push("INSERT INTO ")
            .ident(table)
            .push(" (")
            .ident_list(values.columns.iter().map(String::as_str))
            .push(") VALUES ");

        for (i, row) in values.rows.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push("(");
            for (j, cell) in row.iter().enumerate() {
                if j > 0 {
                    w.push(", ");
                }
                match cell {
                    Some(value) => {
                        w.bind(value.clone());
                    }
                    None => {
                        w.push("DEFAULT");
                    }
                }
            }
            w.push(")");
        }
        Ok(())
    }

    fn write_where(&self, w: &mut SqlWriter, filter: &Filter) -> DbResult<()> {
        if filter.is_match_all() {
            return Ok(());
        }
        w.push(" WHERE ");
        self.write_filter(w, filter)
    }

    fn write_filter(&self, w: &mut SqlWriter, filter: &Filter) -> DbResult<()> {
        match filter {
            Filter::And(children) => self.write_junction(w, children, " AND ", "1 = 1"),
            Filter::Or(children) => self.write_junction(w, children, " OR ", "1 = 0"),
            Filter::Not(inner) => {
                w.push("NOT (");
                self.write_filter(w, inner)?;
                w.push(")");
                Ok(())
            }
            Filter::Field { field, op } => self.write_comparison(w, field, op),
        }
    }

    fn write_junction(
        &self,
        w: &mut SqlWriter,
        children: &[Filter],
        separator: &str,
        empty: &str,
    ) -> DbResult<()> {
        if children.is_empty() {
            w.push(empty);
            return Ok(());
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                w.push(separator);
            }
            let nested = children.len() > 1 && matches!(child, Filter::And(_) | Filter::Or(_));
            if nested {
                w.push("(");
            }
            self.write_filter(w, child)?;
            if nested {
                w.push(")");
            }
        }
        Ok(())
    }

    fn write_comparison(&self, w: &mut SqlWriter, column: &str, op: &Comparison) -> DbResult<()> {
        match op {
            Comparison::Eq(Value::Null) | Comparison::IsNull => {
                w.ident(column).push(" IS NULL");
            }
            Comparison::Ne(Value::Null) | Comparison::IsNotNull => {
                w.ident(column).push(" IS NOT NULL");
            }
            Comparison::Eq(v) => self.write_binary(w, column, "=", v.clone()),
            Comparison::Ne(v) => self.write_binary(w, column, "<>", v.clone()),
            Comparison::Lt(v) => self.write_binary(w, column, "<", v.clone()),
            Comparison::Lte(v) => self.write_binary(w, column, "<=", v.clone()),
            Comparison::Gt(v) => self.write_binary(w, column, ">", v.clone()),
            Comparison::Gte(v) => self.write_binary(w, column, ">=", v.clone()),
            Comparison::In(values) => self.write_list(w, column, "IN", values, "1 = 0"),
            Comparison::Nin(values) => self.write_list(w, column, "NOT IN", values, "1 = 1"),
            Comparison::Like(pattern) => {
                self.write_binary(w, column, "LIKE", Value::Text(pattern.clone()));
            }
            Comparison::ILike(pattern) => {
                if self.dialect.supports_ilike() {
                    self.write_binary(w, column, "ILIKE", Value::Text(pattern.clone()));
                } else {
                    w.push("LOWER(")
                        .ident(column)
                        .push(") LIKE LOWER(")
                        .bind(Value::Text(pattern.clone()))
                        .push(")");
                }
            }
            Comparison::StartsWith(s) => {
                self.write_escaped_like(w, column, format!("{}%", escape_like(s)));
            }
            Comparison::EndsWith(s) => {
                self.write_escaped_like(w, column, format!("%{}", escape_like(s)));
            }
            Comparison::Includes(s) => {
                self.write_escaped_like(w, column, format!("%{}%", escape_like(s)));
            }
            Comparison::Regex(pattern) => {
                if !self.dialect.supports_regex() {
                    return Err(DbError::unsupported(self.dialect, "regular expression match"));
                }
                let op = if self.dialect == Dialect::Postgres { "~" } else { "REGEXP" };
                self.write_binary(w, column, op, Value::Text(pattern.clone()));
            }
        }
        Ok(())
    }

    fn write_binary(&self, w: &mut SqlWriter, column: &str, op: &str, value: Value) {
        w.ident(column).push(" ").push(op).push(" ").bind(value);
    }

    fn write_list(&self, w: &mut SqlWriter, column: &str, op: &str, values: &[Value], empty: &str) {
        if values.is_empty() {
            w.push(empty);
            return;
        }
        w.ident(column).push(" ").push(op).push(" (");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.bind(value.clone());
        }
        w.push(")");
    }

    fn write_escaped_like(&self, w: &mut SqlWriter, column: &str, pattern: String) {
        self.write_binary(w, column, "LIKE", Value::Text(pattern));
        w.push(self.dialect.like_escape_clause());
    }

    fn write_limit(&self, w: &mut SqlWriter, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (Some(limit), _) => {
                w.push(" LIMIT ").push(&limit.to_string());
            }
            (None, Some(_)) => {
                if let Some(unbounded) = self.dialect.unbounded_limit() {
                    w.push(" LIMIT ").push(unbounded);
                }
            }
            (None, None) => {}
        }
        if let Some(offset) = offset {
            w.push(" OFFSET ").push(&offset.to_string());
        }
    }
}

/// Escape LIKE wildcards (`%`, `_`) and the escape character itself.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
