//! Per-tenant connection cache with single-flight creation.
//!
//! The pool maps tenant ids to one live connection each. Creating a connection is
//! slow, so a naive "check, create, insert" sequence lets two concurrent first
//! requests for the same tenant both create a connection, the second insert
//! silently replacing (and leaking) the first. The pool instead keeps an
//! in-flight map of shared pending creations: every caller that misses the cache
//! while a creation is pending awaits that same creation.
//!
//! # State machine
//!
//! Per tenant id the pool moves through
//! `Absent → Creating → Open → Closed`:
//!
//! - `Absent → Creating` happens once per tenant, for the first caller.
//! - `Creating → Open` when the factory succeeds; every waiter gets the same handle.
//! - `Creating → Absent` when the factory fails; every waiter gets the error and the
//!   next call starts over.
//! - `Open → Closed` on [`ConnectionPool::remove`] or [`ConnectionPool::teardown_all`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tenantry_core::ConnectionPool;
//!
//! let pool = ConnectionPool::new();
//! let factory = factory.clone();
//! let conn = pool
//!     .get_or_create(&tenant.id, &tenant.database, move || async move {
//!         factory.create("gw_db").await
//!     })
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{TenancyError, TenancyResult};
use crate::factory::TenantConnection;
use crate::tenant::TenantId;

/// Shared handle to a pooled connection.
pub type ConnectionHandle<C> = Arc<PooledConnection<C>>;

type PendingConnection<C> = Shared<BoxFuture<'static, TenancyResult<ConnectionHandle<C>>>>;

/// Lifecycle state of a tenant's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no creation pending.
    Absent,
    /// A creation is in flight.
    Creating,
    /// A live connection is cached.
    Open,
    /// The connection has been closed.
    Closed,
}

/// A tenant connection owned by the pool.
///
/// Requests hold clones of the [`ConnectionHandle`]; only the pool closes it.
pub struct PooledConnection<C> {
    tenant_id: TenantId,
    database: String,
    connection: C,
    open: AtomicBool,
    opened_at: Instant,
    pub(crate) schemas: tokio::sync::Mutex<HashSet<String>>,
}

impl<C: TenantConnection> PooledConnection<C> {
    /// Wrap a freshly opened connection.
    pub fn new(tenant_id: TenantId, database: impl Into<String>, connection: C) -> Self {
        Self {
            tenant_id,
            database: database.into(),
            connection,
            open: AtomicBool::new(true),
            opened_at: Instant::now(),
            schemas: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Tenant this connection belongs to.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Logical database this connection addresses.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The underlying driver connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Current state (`Open` or `Closed`).
    pub fn state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    /// Close the underlying connection. Closing twice is a no-op.
    pub(crate) async fn close(&self) -> TenancyResult<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.connection.close().await
        } else {
            Ok(())
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("tenant_id", &self.tenant_id)
            .field("database", &self.database)
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that started a new creation.
    pub misses: u64,
    /// Lookups that joined a creation already in flight.
    pub joined: u64,
    /// Connections successfully created.
    pub created: u64,
    /// Creations that failed.
    pub creation_failures: u64,
    /// Connections evicted by `remove`, `set` or teardown.
    pub evictions: u64,
    /// Close calls that failed.
    pub close_failures: u64,
}

/// Thread-safe pool statistics.
#[derive(Debug, Default)]
struct AtomicPoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    created: AtomicU64,
    creation_failures: AtomicU64,
    evictions: AtomicU64,
    close_failures: AtomicU64,
}

impl AtomicPoolStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of closing every pooled connection.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Connections closed cleanly.
    pub closed: usize,
    /// Connections whose close failed, with the failure.
    pub failed: Vec<(TenantId, TenancyError)>,
}

impl TeardownReport {
    /// Check if every close succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total number of connections that were torn down.
    pub fn total(&self) -> usize {
        self.closed + self.failed.len()
    }
}

struct InFlight<C> {
    generation: u64,
    pending: PendingConnection<C>,
}

struct PoolInner<C> {
    // Lock order: `in_flight` before `connections`.
    connections: RwLock<HashMap<TenantId, ConnectionHandle<C>>>,
    in_flight: Mutex<HashMap<TenantId, InFlight<C>>>,
    generation: AtomicU64,
    stats: AtomicPoolStats,
}

/// In-memory cache of one connection per tenant.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: TenantConnection> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: TenantConnection> ConnectionPool<C> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connections: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                stats: AtomicPoolStats::default(),
            }),
        }
    }

    /// Check if a connection is cached for the tenant.
    pub fn has(&self, tenant_id: &TenantId) -> bool {
        self.inner.connections.read().contains_key(tenant_id)
    }

    /// Get the cached connection for the tenant.
    pub fn get(&self, tenant_id: &TenantId) -> Option<ConnectionHandle<C>> {
        self.inner.connections.read().get(tenant_id).cloned()
    }

    /// Like [`get`](Self::get), counting a hit in the statistics.
    pub(crate) fn lookup(&self, tenant_id: &TenantId) -> Option<ConnectionHandle<C>> {
        let conn = self.get(tenant_id)?;
        AtomicPoolStats::bump(&self.inner.stats.hits);
        Some(conn)
    }

    /// Lifecycle state for the tenant.
    pub fn state(&self, tenant_id: &TenantId) -> ConnectionState {
        let in_flight = self.inner.in_flight.lock();
        if let Some(conn) = self.inner.connections.read().get(tenant_id) {
            return conn.state();
        }
        if in_flight.contains_key(tenant_id) {
            ConnectionState::Creating
        } else {
            ConnectionState::Absent
        }
    }

    /// Cache a connection, closing whatever it displaces.
    ///
    /// A creation still in flight for the tenant is abandoned; when it settles it
    /// closes its own connection instead of caching it.
    pub async fn set(
        &self,
        tenant_id: TenantId,
        database: impl Into<String>,
        connection: C,
    ) -> ConnectionHandle<C> {
        let handle = Arc::new(PooledConnection::new(tenant_id.clone(), database, connection));

        let displaced = {
            let mut in_flight = self.inner.in_flight.lock();
            in_flight.remove(&tenant_id);
            self.inner
                .connections
                .write()
                .insert(tenant_id.clone(), Arc::clone(&handle))
        };

        if let Some(old) = displaced {
            warn!(tenant = %tenant_id, "replacing cached tenant connection");
            AtomicPoolStats::bump(&self.inner.stats.evictions);
            self.close_logged(&old).await;
        }

        handle
    }

    /// Close and evict the tenant's connection.
    ///
    /// Returns `Ok(true)` if a connection was cached. The entry is evicted even if
    /// closing fails; the close failure is returned.
    pub async fn remove(&self, tenant_id: &TenantId) -> TenancyResult<bool> {
        let removed = {
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight.remove(tenant_id).is_some() {
                debug!(tenant = %tenant_id, "abandoning in-flight connection creation");
            }
            self.inner.connections.write().remove(tenant_id)
        };

        let Some(conn) = removed else {
            return Ok(false);
        };

        AtomicPoolStats::bump(&self.inner.stats.evictions);
        match conn.close().await {
            Ok(()) => {
                info!(tenant = %tenant_id, "tenant connection closed and evicted");
                Ok(true)
            }
            Err(e) => {
                AtomicPoolStats::bump(&self.inner.stats.close_failures);
                warn!(tenant = %tenant_id, error = %e, "tenant connection evicted but close failed");
                Err(e)
            }
        }
    }

    /// Get the cached connection or create it exactly once.
    ///
    /// Concurrent callers for the same tenant share a single invocation of `init`.
    /// If `init` fails, every waiter receives the error and the next call retries.
    pub async fn get_or_create<F, Fut>(
        &self,
        tenant_id: &TenantId,
        database: &str,
        init: F,
    ) -> TenancyResult<ConnectionHandle<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenancyResult<C>> + Send + 'static,
    {
        if let Some(conn) = self.lookup(tenant_id) {
            return Ok(conn);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();

            // A creation may have settled between the fast path and taking the lock.
            if let Some(conn) = self.inner.connections.read().get(tenant_id) {
                AtomicPoolStats::bump(&self.inner.stats.hits);
                return Ok(Arc::clone(conn));
            }

            match in_flight.get(tenant_id) {
                Some(entry) => {
                    AtomicPoolStats::bump(&self.inner.stats.joined);
                    debug!(tenant = %tenant_id, "joining in-flight connection creation");
                    entry.pending.clone()
                }
                None => {
                    AtomicPoolStats::bump(&self.inner.stats.misses);
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let pending = settle(
                        Arc::clone(&self.inner),
                        tenant_id.clone(),
                        database.to_string(),
                        generation,
                        init(),
                    )
                    .boxed()
                    .shared();

                    in_flight.insert(
                        tenant_id.clone(),
                        InFlight {
                            generation,
                            pending: pending.clone(),
                        },
                    );
                    debug!(tenant = %tenant_id, database = %database, "starting connection creation");
                    pending
                }
            }
        };

        pending.await
    }

    /// Close every cached connection.
    ///
    /// Closes run concurrently. Failures are logged and collected, never
    /// propagated, so shutdown always completes. Pending creations are abandoned
    /// and close their connections when they settle.
    pub async fn teardown_all(&self) -> TeardownReport {
        let drained: Vec<ConnectionHandle<C>> = {
            let mut in_flight = self.inner.in_flight.lock();
            in_flight.clear();
            self.inner
                .connections
                .write()
                .drain()
                .map(|(_, conn)| conn)
                .collect()
        };

        info!(connections = drained.len(), "tearing down tenant connections");

        let results = join_all(drained.iter().map(|conn| async move {
            (conn.tenant_id().clone(), conn.close().await)
        }))
        .await;

        let mut report = TeardownReport::default();
        for (tenant_id, result) in results {
            AtomicPoolStats::bump(&self.inner.stats.evictions);
            match result {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    AtomicPoolStats::bump(&self.inner.stats.close_failures);
                    error!(tenant = %tenant_id, error = %e, "failed to close tenant connection");
                    report.failed.push((tenant_id, e));
                }
            }
        }

        if report.is_clean() {
            info!(closed = report.closed, "tenant connections torn down");
        } else {
            warn!(
                closed = report.closed,
                failed = report.failed.len(),
                "tenant connections torn down with failures"
            );
        }

        report
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Check if the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of creations currently in flight.
    pub fn pending(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Ids of tenants with a cached connection.
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.inner.connections.read().keys().cloned().collect()
    }

    /// Snapshot of the pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot()
    }

    async fn close_logged(&self, conn: &PooledConnection<C>) {
        if let Err(e) = conn.close().await {
            AtomicPoolStats::bump(&self.inner.stats.close_failures);
            warn!(tenant = %conn.tenant_id(), error = %e, "failed to close tenant connection");
        }
    }
}

/// Drive one creation to completion and publish the result.
///
/// Runs inside the shared future, so it settles exactly once no matter how many
/// callers await it.
async fn settle<C, Fut>(
    inner: Arc<PoolInner<C>>,
    tenant_id: TenantId,
    database: String,
    generation: u64,
    init: Fut,
) -> TenancyResult<ConnectionHandle<C>>
where
    C: TenantConnection,
    Fut: Future<Output = TenancyResult<C>> + Send + 'static,
{
    let started = Instant::now();
    let result = init.await;

    let is_current = |in_flight: &HashMap<TenantId, InFlight<C>>| {
        in_flight
            .get(&tenant_id)
            .is_some_and(|entry| entry.generation == generation)
    };

    match result {
        Ok(connection) => {
            let handle = Arc::new(PooledConnection::new(
                tenant_id.clone(),
                database,
                connection,
            ));

            let published = {
                let mut in_flight = inner.in_flight.lock();
                if is_current(&in_flight) {
                    in_flight.remove(&tenant_id);
                    inner
                        .connections
                        .write()
                        .insert(tenant_id.clone(), Arc::clone(&handle));
                    true
                } else {
                    false
                }
            };

            if !published {
                warn!(tenant = %tenant_id, "tenant evicted while connecting; closing new connection");
                if let Err(e) = handle.close().await {
                    AtomicPoolStats::bump(&inner.stats.close_failures);
                    warn!(tenant = %tenant_id, error = %e, "failed to close abandoned connection");
                }
                return Err(TenancyError::retryable(format!(
                    "tenant {} was evicted while connecting",
                    tenant_id
                )));
            }

            AtomicPoolStats::bump(&inner.stats.created);
            info!(
                tenant = %tenant_id,
                database = %handle.database(),
                elapsed = ?started.elapsed(),
                "tenant connection opened"
            );
            Ok(handle)
        }
        Err(e) => {
            {
                let mut in_flight = inner.in_flight.lock();
                if is_current(&in_flight) {
                    in_flight.remove(&tenant_id);
                }
            }
            AtomicPoolStats::bump(&inner.stats.creation_failures);
            warn!(tenant = %tenant_id, error = %e, "tenant connection creation failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ConnectionFactory;
    use crate::testing::{MockConnection, MockFactory};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn create_with(
        factory: &Arc<MockFactory>,
        database: &str,
    ) -> impl FnOnce() -> BoxFuture<'static, TenancyResult<MockConnection>> + use<> {
        let factory = Arc::clone(factory);
        let database = database.to_string();
        move || async move { factory.create(&database).await }.boxed()
    }

    #[tokio::test]
    async fn test_get_or_create_caches() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new());
        let id = TenantId::new("t1");

        assert_eq!(pool.state(&id), ConnectionState::Absent);

        let first = pool
            .get_or_create(&id, "gw_db", create_with(&factory, "gw_db"))
            .await
            .unwrap();
        let second = pool
            .get_or_create(&id, "gw_db", create_with(&factory, "gw_db"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.create_count(), 1);
        assert_eq!(pool.state(&id), ConnectionState::Open);
        assert!(pool.has(&id));

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.created, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_creates_once() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new().with_delay(Duration::from_millis(50)));
        let id = TenantId::new("t1");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                let id = id.clone();
                let init = create_with(&factory, "gw_db");
                tokio::spawn(async move { pool.get_or_create(&id, "gw_db", init).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(factory.create_count(), 1);
        assert_eq!(factory.open_count("gw_db"), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_then_retries() {
        let pool: ConnectionPool<MockConnection> = ConnectionPool::new();
        let factory = Arc::new(
            MockFactory::new()
                .with_delay(Duration::from_millis(20))
                .failing_times(1),
        );
        let id = TenantId::new("t1");

        let (a, b) = tokio::join!(
            pool.get_or_create(&id, "gw_db", create_with(&factory, "gw_db")),
            pool.get_or_create(&id, "gw_db", create_with(&factory, "gw_db")),
        );
        assert!(a.unwrap_err().is_connection_error());
        assert!(b.unwrap_err().is_connection_error());
        assert_eq!(factory.create_count(), 1);
        assert_eq!(pool.state(&id), ConnectionState::Absent);

        pool.get_or_create(&id, "gw_db", create_with(&factory, "gw_db"))
            .await
            .unwrap();
        assert_eq!(factory.create_count(), 2);
        assert_eq!(pool.stats().creation_failures, 1);
    }

    #[tokio::test]
    async fn test_remove_closes_and_evicts() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new());
        let id = TenantId::new("t1");

        let conn = pool
            .get_or_create(&id, "gw_db", create_with(&factory, "gw_db"))
            .await
            .unwrap();

        assert!(pool.remove(&id).await.unwrap());
        assert!(!pool.has(&id));
        assert!(!conn.is_open());
        assert!(conn.connection().is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(factory.open_count("gw_db"), 0);

        assert!(!pool.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_during_creation_discards_connection() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new().with_delay(Duration::from_millis(50)));
        let id = TenantId::new("t1");

        let creating = {
            let pool = pool.clone();
            let id = id.clone();
            let init = create_with(&factory, "gw_db");
            tokio::spawn(async move { pool.get_or_create(&id, "gw_db", init).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.state(&id), ConnectionState::Creating);
        assert!(!pool.remove(&id).await.unwrap());

        let err = creating.await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(!pool.has(&id));
        assert_eq!(factory.open_count("gw_db"), 0);
    }

    #[tokio::test]
    async fn test_set_closes_displaced_connection() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new());
        let id = TenantId::new("t1");

        let first = pool
            .set(id.clone(), "gw_db", factory.create("gw_db").await.unwrap())
            .await;
        let second = pool
            .set(id.clone(), "gw_db", factory.create("gw_db").await.unwrap())
            .await;

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(factory.open_count("gw_db"), 1);
        assert!(Arc::ptr_eq(&pool.get(&id).unwrap(), &second));
    }

    #[tokio::test]
    async fn test_teardown_continues_past_failures() {
        let pool = ConnectionPool::new();
        let factory = Arc::new(MockFactory::new().failing_close_for("bad_db"));

        for (id, db) in [("t1", "a_db"), ("t2", "bad_db"), ("t3", "c_db")] {
            pool.get_or_create(&TenantId::new(id), db, create_with(&factory, db))
                .await
                .unwrap();
        }

        let report = pool.teardown_all().await;
        assert_eq!(report.closed, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, TenantId::new("t2"));
        assert_eq!(report.total(), 3);
        assert!(pool.is_empty());
        assert_eq!(factory.open_count("a_db"), 0);
        assert_eq!(factory.open_count("c_db"), 0);
        assert_eq!(pool.stats().close_failures, 1);
    }
}
