//! Tenant-to-connection resolution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{TenancyConfig, millis_saturating};
use crate::directory::TenantDirectory;
use crate::error::{TenancyError, TenancyResult};
use crate::factory::{ConnectionFactory, TenantConnection};
use crate::pool::{ConnectionHandle, ConnectionPool};
use crate::tenant::{Tenant, TenantId};

/// Resolves tenants to live connections.
///
/// Combines a [`TenantDirectory`] lookup, the active-status check, and the pool's
/// single-flight creation. Cloning is cheap and clones share the same pool.
pub struct TenantResolver<C> {
    directory: Arc<dyn TenantDirectory>,
    factory: Arc<dyn ConnectionFactory<C>>,
    pool: ConnectionPool<C>,
    lookup_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl<C> Clone for TenantResolver<C> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            factory: Arc::clone(&self.factory),
            pool: self.pool.clone(),
            lookup_timeout: self.lookup_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

impl<C: TenantConnection> TenantResolver<C> {
    /// Create a resolver with an empty pool and no timeouts.
    pub fn new(directory: Arc<dyn TenantDirectory>, factory: Arc<dyn ConnectionFactory<C>>) -> Self {
        Self {
            directory,
            factory,
            pool: ConnectionPool::new(),
            lookup_timeout: None,
            connect_timeout: None,
        }
    }

    /// Create a resolver using the timeouts from `config`.
    pub fn from_config(
        config: &TenancyConfig,
        directory: Arc<dyn TenantDirectory>,
        factory: Arc<dyn ConnectionFactory<C>>,
    ) -> Self {
        Self::new(directory, factory)
            .with_lookup_timeout(config.lookup_timeout())
            .with_connect_timeout(config.connect_timeout())
    }

    /// Use an existing pool.
    pub fn with_pool(mut self, pool: ConnectionPool<C>) -> Self {
        self.pool = pool;
        self
    }

    /// Bound every directory lookup.
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Bound every connection creation.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The connection pool.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// The tenant directory.
    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Get a live connection for the tenant, creating it if needed.
    ///
    /// A cached connection is returned without touching the directory.
    /// Otherwise the tenant must exist and be active. Failures are not retried.
    pub async fn get_tenant_connection(
        &self,
        tenant_id: &TenantId,
    ) -> TenancyResult<ConnectionHandle<C>> {
        if let Some(conn) = self.pool.lookup(tenant_id) {
            return Ok(conn);
        }

        let tenant = bounded(
            self.lookup_timeout,
            "tenant lookup",
            self.directory.find_by_id(tenant_id),
        )
        .await?
        .ok_or_else(|| TenancyError::not_found(tenant_id.as_str()))?;

        self.connect(&tenant).await
    }

    /// Look a tenant up by routing name and get its connection.
    pub async fn resolve_by_name(
        &self,
        name: &str,
    ) -> TenancyResult<(Tenant, ConnectionHandle<C>)> {
        let tenant = bounded(
            self.lookup_timeout,
            "tenant lookup",
            self.directory.find_by_name(name),
        )
        .await?
        .ok_or_else(|| TenancyError::not_found(name))?;

        let conn = self.connect(&tenant).await?;
        Ok((tenant, conn))
    }

    /// Close and evict the tenant's connection.
    pub async fn evict(&self, tenant_id: &TenantId) -> TenancyResult<bool> {
        self.pool.remove(tenant_id).await
    }

    async fn connect(&self, tenant: &Tenant) -> TenancyResult<ConnectionHandle<C>> {
        if !tenant.is_active() {
            debug!(tenant = %tenant.name, status = %tenant.status, "rejecting inactive tenant");
            return Err(TenancyError::inactive(&tenant.name));
        }

        if let Some(conn) = self.pool.lookup(&tenant.id) {
            return Ok(conn);
        }

        let factory = Arc::clone(&self.factory);
        let database = tenant.database.clone();
        let timeout = self.connect_timeout;

        self.pool
            .get_or_create(&tenant.id, &tenant.database, move || async move {
                bounded(timeout, "tenant connection", factory.create(&database)).await
            })
            .await
    }
}

/// Await `fut`, turning an elapsed `limit` into a retryable connection error.
async fn bounded<T>(
    limit: Option<Duration>,
    operation: &str,
    fut: impl Future<Output = TenancyResult<T>>,
) -> TenancyResult<T> {
    let Some(limit) = limit else {
        return fut.await;
    };

    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            let millis = millis_saturating(limit);
            warn!(operation, timeout_ms = millis, "operation timed out");
            Err(TenancyError::timeout(operation, millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryTenantDirectory;
    use crate::testing::{MockConnection, MockFactory};
    use crate::tenant::TenantStatus;
    use pretty_assertions::assert_eq;

    fn directory() -> Arc<InMemoryTenantDirectory> {
        Arc::new(InMemoryTenantDirectory::with_tenants([
            Tenant::new(TenantId::new("t-gw"), "greenwood", "gw_db"),
            Tenant::new(TenantId::new("t-old"), "oldschool", "old_db")
                .with_status(TenantStatus::Inactive),
        ]))
    }

    fn resolver(
        directory: &Arc<InMemoryTenantDirectory>,
        factory: &Arc<MockFactory>,
    ) -> TenantResolver<MockConnection> {
        TenantResolver::new(directory.clone(), factory.clone())
    }

    #[tokio::test]
    async fn test_second_resolve_hits_pool() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new());
        let resolver = resolver(&directory, &factory);
        let id = TenantId::new("t-gw");

        let first = resolver.get_tenant_connection(&id).await.unwrap();
        let second = resolver.get_tenant_connection(&id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.database(), "gw_db");
        assert_eq!(factory.create_count(), 1);
        assert_eq!(directory.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_leaves_pool_untouched() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new());
        let resolver = resolver(&directory, &factory);

        let err = resolver
            .get_tenant_connection(&TenantId::new("missing"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(resolver.pool().is_empty());
        assert_eq!(resolver.pool().pending(), 0);
        assert_eq!(factory.create_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_tenant_creates_no_connection() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new());
        let resolver = resolver(&directory, &factory);

        let err = resolver.resolve_by_name("oldschool").await.unwrap_err();

        assert_eq!(err, TenancyError::inactive("oldschool"));
        assert_eq!(factory.create_count(), 0);
        assert!(resolver.pool().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_by_name() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new());
        let resolver = resolver(&directory, &factory);

        let (tenant, conn) = resolver.resolve_by_name("greenwood").await.unwrap();
        assert_eq!(tenant.id, TenantId::new("t-gw"));
        assert_eq!(conn.connection().database(), "gw_db");

        let err = resolver.resolve_by_name("unknownschool").await.unwrap_err();
        assert_eq!(err, TenancyError::not_found("unknownschool"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolves_share_one_connection() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new().with_delay(Duration::from_millis(50)));
        let resolver = resolver(&directory, &factory);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    resolver.get_tenant_connection(&TenantId::new("t-gw")).await
                })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(factory.create_count(), 1);
        assert_eq!(factory.open_count("gw_db"), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_factory_times_out_as_retryable() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new().hanging());
        let resolver = resolver(&directory, &factory)
            .with_connect_timeout(Some(Duration::from_millis(200)));

        let err = resolver
            .get_tenant_connection(&TenantId::new("t-gw"))
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
        assert!(err.is_retryable());
        assert_eq!(resolver.pool().pending(), 0);
        assert_eq!(resolver.pool().stats().creation_failures, 1);
    }

    #[tokio::test]
    async fn test_evict_forces_reconnect() {
        let directory = directory();
        let factory = Arc::new(MockFactory::new());
        let resolver = resolver(&directory, &factory);
        let id = TenantId::new("t-gw");

        let first = resolver.get_tenant_connection(&id).await.unwrap();
        assert!(resolver.evict(&id).await.unwrap());
        assert!(!first.is_open());

        let second = resolver.get_tenant_connection(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.create_count(), 2);
        assert_eq!(factory.open_count("gw_db"), 1);
    }
}
