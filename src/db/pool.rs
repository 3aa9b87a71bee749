//! Bounded connection pool.
//!
//! Capacity is enforced by a semaphore: every leased connection holds one
//! permit for as long as its [`Lease`] lives. Idle connections are kept in a
//! plain vector and reused last-in first-out; new ones are opened lazily.

use crate::config::DatabaseConfig;
use crate::db::connection::DbConnection;
use crate::db::querier::Querier;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, EntityRegistry, PoolStatus};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct PoolInner {
    config: DatabaseConfig,
    registry: Arc<EntityRegistry>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<DbConnection>>,
    capacity: u32,
    closed: AtomicBool,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take_idle(&self) -> Option<DbConnection> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn put_idle(&self, conn: DbConnection) {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
    }

    fn drain_idle(&self) -> Vec<DbConnection> {
        std::mem::take(&mut *self.idle.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Shared handle to a bounded set of connections for one database.
///
/// Cloning is cheap; every clone refers to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("dialect", &self.inner.config.dialect)
            .field("status", &self.status())
            .finish()
    }
}

impl Pool {
    /// Create a pool. No connection is opened until the first acquisition.
    pub fn new(config: DatabaseConfig, registry: Arc<EntityRegistry>) -> DbResult<Self> {
        config.pool_options.validate()?;
        let capacity = config.pool_options.max_connections_or_default(config.dialect);

        debug!(
            dialect = %config.dialect,
            capacity,
            acquire_timeout_ms = config.pool_options.acquire_timeout_or_default().as_millis() as u64,
            "Created pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity as usize)),
                idle: Mutex::new(Vec::new()),
                capacity,
                closed: AtomicBool::new(false),
                config,
                registry,
            }),
        })
    }

    /// Create a pool and verify that a connection can be opened.
    pub async fn connect(config: DatabaseConfig, registry: Arc<EntityRegistry>) -> DbResult<Self> {
        let pool = Self::new(config, registry)?;
        let mut lease = pool.acquire().await?;
        lease.conn_mut()?.ping().await?;
        Ok(pool)
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.config.dialect
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Lease a connection and wrap it in a [`Querier`].
    ///
    /// The caller must [`release`](Querier::release) the querier when done;
    /// dropping it also returns the connection.
    pub async fn get_querier(&self) -> DbResult<Querier> {
        let lease = self.acquire().await?;
        Ok(Querier::new(
            lease,
            Arc::clone(&self.inner.registry),
            self.inner.config.pool_options.log_params_or_default(),
        ))
    }

    /// Run `f` inside a transaction on a freshly leased querier.
    ///
    /// The querier is released on every path, after commit or rollback.
    pub async fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: for<'q> FnOnce(&'q mut Querier) -> BoxFuture<'q, DbResult<T>>,
    {
        let mut querier = self.get_querier().await?;
        let result = querier.transaction(f).await;
        let released = querier.release();
        match result {
            Ok(value) => released.map(|_| value),
            Err(e) => Err(e),
        }
    }

    pub fn status(&self) -> PoolStatus {
        let available = self.inner.semaphore.available_permits() as u32;
        PoolStatus {
            capacity: self.inner.capacity,
            in_use: self.inner.capacity.saturating_sub(available),
            idle: self.inner.idle_count() as u32,
            closed: self.inner.is_closed(),
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now; leased ones are closed when their
    /// lease ends. Later acquisitions fail with [`DbError::PoolClosed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let idle = self.inner.drain_idle();
        let count = idle.len();
        for conn in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close idle connection");
            }
        }
        info!(dialect = %self.dialect(), closed_idle = count, "Pool closed");
    }

    pub(crate) async fn acquire(&self) -> DbResult<Lease> {
        if self.inner.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let wait = self.inner.config.pool_options.acquire_timeout_or_default();
        let start = Instant::now();
        let permit = match timeout(wait, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(
                    capacity = self.inner.capacity,
                    waited_ms, "Timed out waiting for a pooled connection"
                );
                return Err(DbError::pool_exhausted(waited_ms, self.inner.capacity));
            }
        };

        // Permit is dropped with the error if connecting fails
        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => DbConnection::connect(&self.inner.config).await?,
        };

        debug!(
            waited_ms = start.elapsed().as_millis() as u64,
            available = self.inner.semaphore.available_permits(),
            "Acquired connection"
        );

        Ok(Lease {
            conn: Some(conn),
            poisoned: false,
            _permit: permit,
            pool: Arc::clone(&self.inner),
        })
    }
}

/// Exclusive use of one pooled connection.
///
/// Dropping the lease returns the connection to the pool unless it was
/// poisoned or the pool has been closed. The semaphore permit is released
/// after the connection is back in the idle list.
pub struct Lease {
    conn: Option<DbConnection>,
    poisoned: bool,
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("dialect", &self.pool.config.dialect)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Lease {
    pub fn dialect(&self) -> Dialect {
        self.pool.config.dialect
    }

    pub fn conn_mut(&mut self) -> DbResult<&mut DbConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("lease holds no connection"))
    }

    /// Mark the connection as unusable so it is discarded instead of reused.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.poisoned {
            warn!(dialect = %self.pool.config.dialect, "Discarding poisoned connection");
            return;
        }
        if self.pool.is_closed() {
            debug!("Pool closed; dropping returned connection");
            return;
        }

        self.pool.put_idle(conn);
        debug!("Returned connection to pool");
    }
}
