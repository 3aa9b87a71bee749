//! Entity-level query execution on one leased connection.

use crate::db::connection::DbConnection;
use crate::db::pool::Lease;
use crate::error::{DbError, DbResult};
use crate::models::{
    Dialect, EntityMeta, EntityRegistry, ExecOutcome, QuerierState, RawResult, Record, Value,
};
use crate::query::{DescriptorBuilder, Filter, Query, QueryDescriptor};
use crate::sql::{SqlGenerator, Statement, returns_rows};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Executes entity operations and raw SQL on a single pooled connection.
///
/// A querier is either idle or inside one transaction. After
/// [`release`](Self::release) every operation fails with
/// [`DbError::QuerierClosed`].
pub struct Querier {
    id: Uuid,
    lease: Option<Lease>,
    state: QuerierState,
    registry: Arc<EntityRegistry>,
    generator: SqlGenerator,
    log_params: bool,
}

impl std::fmt::Debug for Querier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Querier")
            .field("id", &self.id)
            .field("dialect", &self.generator.dialect())
            .field("state", &self.state)
            .finish()
    }
}

impl Querier {
    pub(crate) fn new(lease: Lease, registry: Arc<EntityRegistry>, log_params: bool) -> Self {
        let id = Uuid::new_v4();
        let dialect = lease.dialect();
        debug!(querier_id = %id, dialect = %dialect, "Querier acquired");
        Self {
            id,
            lease: Some(lease),
            state: QuerierState::Idle,
            registry,
            generator: SqlGenerator::new(dialect),
            log_params,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.generator.dialect()
    }

    pub fn state(&self) -> QuerierState {
        self.state
    }

    pub fn has_open_transaction(&self) -> bool {
        self.state.in_transaction()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find_many(&mut self, entity: &str, query: &Query) -> DbResult<Vec<Record>> {
        let meta = self.entity(entity)?;
        let descriptor = DescriptorBuilder::new(&meta).select(query)?;
        let outcome = self.execute_descriptor(&descriptor).await?;
        Ok(outcome.rows.into_iter().map(|row| meta.to_record(row)).collect())
    }

    /// First matching record, or `None` when nothing matches.
    pub async fn find_one(&mut self, entity: &str, query: &Query) -> DbResult<Option<Record>> {
        let query = query.clone().limit(1);
        Ok(self.find_many(entity, &query).await?.into_iter().next())
    }

    pub async fn find_one_by_id(
        &mut self,
        entity: &str,
        id: &JsonValue,
        project: &[String],
    ) -> DbResult<Option<Record>> {
        let meta = self.entity(entity)?;
        let filter = DescriptorBuilder::new(&meta).id_filter(id)?;
        let query = Query::filtered(filter).project(project.iter().cloned());
        self.find_one(entity, &query).await
    }

    /// Like [`find_one_by_id`](Self::find_one_by_id) but a missing record is
    /// an error.
    pub async fn find_one_by_id_or_fail(
        &mut self,
        entity: &str,
        id: &JsonValue,
        project: &[String],
    ) -> DbResult<Record> {
        self.find_one_by_id(entity, id, project)
            .await?
            .ok_or_else(|| DbError::not_found(entity))
    }

    /// Matching page of records plus the total match count.
    ///
    /// The count ignores sort, skip and limit.
    pub async fn find_many_and_count(
        &mut self,
        entity: &str,
        query: &Query,
    ) -> DbResult<(Vec<Record>, u64)> {
        let rows = self.find_many(entity, query).await?;
        let total = self.count(entity, query.filter.as_ref()).await?;
        Ok((rows, total))
    }

    pub async fn count(&mut self, entity: &str, filter: Option<&Filter>) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let descriptor = DescriptorBuilder::new(&meta).count(filter)?;
        let outcome = self.execute_descriptor(&descriptor).await?;
        outcome
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| DbError::internal("count query returned no count column"))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn insert_one(&mut self, entity: &str, payload: &Record) -> DbResult<JsonValue> {
        let ids = self.insert_many(entity, std::slice::from_ref(payload)).await?;
        Ok(ids.into_iter().next().unwrap_or(JsonValue::Null))
    }

    /// Insert all payloads and return their ids in input order.
    ///
    /// Keys supplied by the caller are echoed back. Generated keys come from
    /// `RETURNING` where the dialect has it, otherwise from the driver's last
    /// insert id, assuming consecutive allocation within the statement.
    ///
    /// The batch is one statement unless the dialect cannot leave a column to
    /// its default inside VALUES; then each run of payloads setting the same
    /// properties is its own statement, all inside one transaction.
    pub async fn insert_many(&mut self, entity: &str, payloads: &[Record]) -> DbResult<Vec<JsonValue>> {
        let meta = self.entity(entity)?;
        let runs = self.statement_runs(payloads);
        if runs.len() <= 1 {
            return self.insert_statement(&meta, payloads).await;
        }

        let began = self.begin_implicit().await?;
        let mut result = Ok(Vec::with_capacity(payloads.len()));
        for run in runs {
            match self.insert_statement(&meta, run).await {
                Ok(ids) => {
                    if let Ok(all) = result.as_mut() {
                        all.extend(ids);
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.finish_implicit(began, result).await
    }

    async fn insert_statement(&mut self, meta: &EntityMeta, payloads: &[Record]) -> DbResult<Vec<JsonValue>> {
        let returning = self.dialect().supports_returning();
        let descriptor = DescriptorBuilder::new(meta).insert(payloads, returning)?;
        let outcome = self.execute_descriptor(&descriptor).await?;

        if returning {
            return Ok(outcome
                .rows
                .into_iter()
                .map(|row| meta.id_of(&meta.to_record(row)).unwrap_or(JsonValue::Null))
                .collect());
        }
        Ok(generated_ids(meta, payloads, outcome.last_insert_id))
    }

    pub async fn update_one_by_id(
        &mut self,
        entity: &str,
        id: &JsonValue,
        payload: &Record,
    ) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let builder = DescriptorBuilder::new(&meta);
        let filter = builder.id_filter(id)?;
        let descriptor = builder.update(Some(&filter), payload)?;
        Ok(self.execute_descriptor(&descriptor).await?.affected)
    }

    /// Update every record matching the query's filter. The filter is
    /// required; use [`Filter::all`] to target every row.
    pub async fn update_many(&mut self, entity: &str, query: &Query, payload: &Record) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let descriptor = DescriptorBuilder::new(&meta).update(query.filter.as_ref(), payload)?;
        Ok(self.execute_descriptor(&descriptor).await?.affected)
    }

    pub async fn save_one(&mut self, entity: &str, payload: &Record) -> DbResult<JsonValue> {
        let ids = self.save_many(entity, std::slice::from_ref(payload)).await?;
        Ok(ids.into_iter().next().unwrap_or(JsonValue::Null))
    }

    /// Insert records without a primary key and update those with one.
    ///
    /// New records go out in a single insert; existing records are updated
    /// by id with their key properties stripped from the payload. Returns ids
    /// in input order.
    pub async fn save_many(&mut self, entity: &str, payloads: &[Record]) -> DbResult<Vec<JsonValue>> {
        let meta = self.entity(entity)?;
        if payloads.is_empty() {
            return Err(DbError::validation("payload", "payload list cannot be empty"));
        }

        let mut ids = vec![JsonValue::Null; payloads.len()];
        let mut pending = Vec::new();
        let mut fresh = Vec::new();

        for (i, payload) in payloads.iter().enumerate() {
            let Some(id) = meta.id_of(payload) else {
                pending.push(i);
                fresh.push(without_unset_keys(&meta, payload));
                continue;
            };
            let changes: Record = payload
                .iter()
                .filter(|(property, _)| !meta.field(property).is_some_and(|c| c.primary_key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !changes.is_empty() {
                self.update_one_by_id(entity, &id, &changes).await?;
            }
            ids[i] = id;
        }

        if !fresh.is_empty() {
            let inserted = self.insert_many(entity, &fresh).await?;
            for (i, id) in pending.into_iter().zip(inserted) {
                ids[i] = id;
            }
        }
        Ok(ids)
    }

    pub async fn upsert_one(
        &mut self,
        entity: &str,
        conflict_paths: &[String],
        payload: &Record,
    ) -> DbResult<u64> {
        self.upsert_many(entity, conflict_paths, std::slice::from_ref(payload))
            .await
    }

    /// Insert or update all payloads in one statement.
    ///
    /// Returns the driver's affected count, whose meaning differs per dialect
    /// (MySQL counts an updated row twice).
    pub async fn upsert_many(
        &mut self,
        entity: &str,
        conflict_paths: &[String],
        payloads: &[Record],
    ) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let runs = self.statement_runs(payloads);
        if runs.len() <= 1 {
            return self.upsert_statement(&meta, conflict_paths, payloads).await;
        }

        let began = self.begin_implicit().await?;
        let mut result = Ok(0);
        for run in runs {
            match self.upsert_statement(&meta, conflict_paths, run).await {
                Ok(affected) => {
                    if let Ok(total) = result.as_mut() {
                        *total += affected;
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.finish_implicit(began, result).await
    }

    async fn upsert_statement(
        &mut self,
        meta: &EntityMeta,
        conflict_paths: &[String],
        payloads: &[Record],
    ) -> DbResult<u64> {
        let descriptor = DescriptorBuilder::new(meta).upsert(conflict_paths, payloads)?;
        Ok(self.execute_descriptor(&descriptor).await?.affected)
    }

    pub async fn delete_one_by_id(&mut self, entity: &str, id: &JsonValue) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let builder = DescriptorBuilder::new(&meta);
        let filter = builder.id_filter(id)?;
        let descriptor = builder.delete(Some(&filter))?;
        Ok(self.execute_descriptor(&descriptor).await?.affected)
    }

    /// Delete every record matching the query's filter. The filter is
    /// required; use [`Filter::all`] to target every row.
    pub async fn delete_many(&mut self, entity: &str, query: &Query) -> DbResult<u64> {
        let meta = self.entity(entity)?;
        let descriptor = DescriptorBuilder::new(&meta).delete(query.filter.as_ref())?;
        Ok(self.execute_descriptor(&descriptor).await?.affected)
    }

    /// Execute caller-written SQL verbatim with bound values.
    ///
    /// Rows are fetched when the statement is a query or has a `RETURNING`
    /// clause; otherwise only the affected count is reported.
    pub async fn run(&mut self, sql: &str, values: &[Value]) -> DbResult<RawResult> {
        self.ensure_open()?;
        let stmt = Statement::raw(sql, values.to_vec(), returns_rows(sql, self.dialect()));
        Ok(self.execute(&stmt).await?.into())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Run `f` between BEGIN and COMMIT.
    ///
    /// An error from `f` rolls the transaction back and is returned as is.
    /// Calling this while a transaction is open fails with
    /// [`DbError::NestedTransaction`].
    pub async fn transaction<T, F>(&mut self, f: F) -> DbResult<T>
    where
        F: for<'q> FnOnce(&'q mut Querier) -> BoxFuture<'q, DbResult<T>>,
    {
        self.begin_transaction().await?;
        let result = f(&mut *self).await;
        self.finish_transaction(result).await
    }

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        if self.state.in_transaction() {
            return Err(DbError::NestedTransaction);
        }
        self.conn()?.begin().await?;
        self.state = QuerierState::InTransaction;
        debug!(querier_id = %self.id, "Transaction started");
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> DbResult<()> {
        self.end_transaction(true).await
    }

    pub async fn rollback_transaction(&mut self) -> DbResult<()> {
        self.end_transaction(false).await
    }

    async fn end_transaction(&mut self, commit: bool) -> DbResult<()> {
        self.ensure_open()?;
        if !self.state.in_transaction() {
            return Err(DbError::transaction("no transaction in progress"));
        }

        let lease = self.lease.as_mut().ok_or(DbError::QuerierClosed)?;
        let conn = lease.conn_mut()?;
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        self.state = QuerierState::Idle;

        if let Err(e) = result {
            // Transaction state on the server is unknown
            lease.poison();
            warn!(querier_id = %self.id, error = %e, "Transaction end failed; connection will be discarded");
            return Err(e);
        }
        debug!(
            querier_id = %self.id,
            outcome = if commit { "commit" } else { "rollback" },
            "Transaction finished"
        );
        Ok(())
    }

    /// Commit when `result` is a success and roll back otherwise.
    ///
    /// A transaction already ended by the caller is left alone. A failed
    /// rollback is logged and the original error returned.
    async fn finish_transaction<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if !self.state.in_transaction() {
            return result;
        }
        match result {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback_transaction().await {
                    warn!(
                        querier_id = %self.id,
                        error = %rollback_err,
                        "Rollback after failed transaction also failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Begin a transaction for a multi-statement write unless one is open.
    /// Returns whether it began one.
    async fn begin_implicit(&mut self) -> DbResult<bool> {
        if self.state.in_transaction() {
            return Ok(false);
        }
        self.begin_transaction().await?;
        Ok(true)
    }

    async fn finish_implicit<T>(&mut self, began: bool, result: DbResult<T>) -> DbResult<T> {
        if began {
            self.finish_transaction(result).await
        } else {
            result
        }
    }

    /// Payload groups that each become one write statement.
    fn statement_runs<'p>(&self, payloads: &'p [Record]) -> Vec<&'p [Record]> {
        if self.dialect().supports_default_in_values() {
            return vec![payloads];
        }
        payloads.chunk_by(same_properties).collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Return the connection to the pool.
    ///
    /// Fails while a transaction is open. Releasing twice is a no-op.
    pub fn release(&mut self) -> DbResult<()> {
        if self.lease.is_none() {
            return Ok(());
        }
        if self.state.in_transaction() {
            return Err(DbError::transaction(
                "cannot release a querier with a pending transaction; commit or roll back first",
            ));
        }
        self.lease = None;
        self.state = QuerierState::Released;
        debug!(querier_id = %self.id, "Querier released");
        Ok(())
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.lease.is_none() || !self.state.is_open() {
            return Err(DbError::QuerierClosed);
        }
        Ok(())
    }

    fn entity(&self, name: &str) -> DbResult<Arc<EntityMeta>> {
        self.ensure_open()?;
        self.registry.get(name)
    }

    fn conn(&mut self) -> DbResult<&mut DbConnection> {
        self.lease
            .as_mut()
            .ok_or(DbError::QuerierClosed)?
            .conn_mut()
    }

    async fn execute_descriptor(&mut self, descriptor: &QueryDescriptor) -> DbResult<ExecOutcome> {
        let stmt = self.generator.generate(descriptor)?;
        debug!(
            querier_id = %self.id,
            kind = descriptor.kind(),
            table = descriptor.table(),
            "Running entity query"
        );
        self.execute(&stmt).await
    }

    async fn execute(&mut self, stmt: &Statement) -> DbResult<ExecOutcome> {
        let log_params = self.log_params;
        let lease = self.lease.as_mut().ok_or(DbError::QuerierClosed)?;
        let result = lease.conn_mut()?.execute(stmt, log_params).await;
        if result.as_ref().is_err_and(DbError::is_connection_fatal) {
            lease.poison();
        }
        result
    }
}

impl Drop for Querier {
    fn drop(&mut self) {
        let Some(mut lease) = self.lease.take() else {
            return;
        };
        if self.state.in_transaction() {
            // Closing the connection makes the server roll back
            lease.poison();
            warn!(
                querier_id = %self.id,
                "Querier dropped mid-transaction; discarding connection"
            );
        } else {
            warn!(
                querier_id = %self.id,
                "Querier dropped without release; returning connection"
            );
        }
    }
}

/// Ids for an insert on a dialect without `RETURNING`.
///
/// The driver reports the key of the first generated row and later generated
/// rows follow it. A caller-supplied key after a generated row may move the
/// counter, so generated keys past that point are unknown.
fn generated_ids(meta: &EntityMeta, payloads: &[Record], first: Option<u64>) -> Vec<JsonValue> {
    let mut next = first.filter(|&id| id > 0 && !meta.is_composite_key());
    let mut generated = false;
    payloads
        .iter()
        .map(|payload| match meta.id_of(payload) {
            Some(id) => {
                if generated {
                    next = None;
                }
                id
            }
            None => {
                generated = true;
                match next {
                    Some(id) => {
                        next = Some(id + 1);
                        JsonValue::from(id)
                    }
                    None => JsonValue::Null,
                }
            }
        })
        .collect()
}

/// `payload` without primary-key properties set to null, leaving those keys
/// to the column default.
fn without_unset_keys(meta: &EntityMeta, payload: &Record) -> Record {
    payload
        .iter()
        .filter(|(property, value)| {
            !(value.is_null() && meta.field(property).is_some_and(|c| c.primary_key))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn same_properties(a: &Record, b: &Record) -> bool {
    a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
}
