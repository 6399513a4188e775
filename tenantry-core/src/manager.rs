//! Tenant lifecycle management.
//!
//! [`TenantManager`] is the administrative API over the directory. It keeps the
//! connection pool consistent with the records: suspending or deleting a tenant
//! closes and evicts its connection as part of the call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::directory::TenantDirectory;
use crate::error::{TenancyError, TenancyResult};
use crate::factory::TenantConnection;
use crate::resolver::TenantResolver;
use crate::tenant::{Tenant, TenantId, TenantQuotas, TenantStatus};

/// Hook run when tenants are created or deleted.
///
/// Typically bootstraps the new tenant database, e.g. by creating its first
/// administrator account.
#[async_trait]
pub trait TenantProvisioner: Send + Sync {
    /// Prepare resources for a freshly inserted tenant.
    async fn provision(&self, tenant: &Tenant) -> TenancyResult<()>;

    /// Release resources of a tenant about to be deleted.
    async fn deprovision(&self, _tenant: &Tenant) -> TenancyResult<()> {
        Ok(())
    }
}

/// Provisioner that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProvisioner;

#[async_trait]
impl TenantProvisioner for NoOpProvisioner {
    async fn provision(&self, _tenant: &Tenant) -> TenancyResult<()> {
        Ok(())
    }
}

/// Request to create a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    /// Unique routing name.
    pub name: String,
    /// Logical database id; derived from the name when absent.
    #[serde(default)]
    pub database: Option<String>,
    /// Informational quotas.
    #[serde(default)]
    pub quotas: TenantQuotas,
    /// Free-form settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl NewTenant {
    /// Create a request for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: None,
            quotas: TenantQuotas::default(),
            settings: serde_json::Value::Null,
        }
    }

    /// Use an explicit logical database id.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set quotas.
    pub fn with_quotas(mut self, quotas: TenantQuotas) -> Self {
        self.quotas = quotas;
        self
    }

    /// Set settings.
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }
}

/// Partial update of a tenant record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    /// New routing name.
    #[serde(default)]
    pub name: Option<String>,
    /// New quotas.
    #[serde(default)]
    pub quotas: Option<TenantQuotas>,
    /// New settings.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

/// Derive a logical database id from a tenant name.
///
/// ```rust
/// use tenantry_core::manager::database_name_for;
///
/// assert_eq!(database_name_for("Green Wood"), "green_wood_db");
/// ```
pub fn database_name_for(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_db", slug)
}

/// Administrative tenant lifecycle API.
pub struct TenantManager<C> {
    resolver: TenantResolver<C>,
    provisioner: Arc<dyn TenantProvisioner>,
}

impl<C> Clone for TenantManager<C> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            provisioner: Arc::clone(&self.provisioner),
        }
    }
}

impl<C: TenantConnection> TenantManager<C> {
    /// Create a manager with a no-op provisioner.
    pub fn new(resolver: TenantResolver<C>) -> Self {
        Self::with_provisioner(resolver, Arc::new(NoOpProvisioner))
    }

    /// Create a manager with a custom provisioner.
    pub fn with_provisioner(
        resolver: TenantResolver<C>,
        provisioner: Arc<dyn TenantProvisioner>,
    ) -> Self {
        Self {
            resolver,
            provisioner,
        }
    }

    fn directory(&self) -> &Arc<dyn TenantDirectory> {
        self.resolver.directory()
    }

    async fn require(&self, id: &TenantId) -> TenancyResult<Tenant> {
        self.directory()
            .find_by_id(id)
            .await?
            .ok_or_else(|| TenancyError::not_found(id.as_str()))
    }

    /// Create a tenant and run the provisioner.
    ///
    /// If provisioning fails the record is removed again and the error returned.
    pub async fn provision(&self, request: NewTenant) -> TenancyResult<Tenant> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(TenancyError::TenantNameMissing);
        }
        let database = request
            .database
            .unwrap_or_else(|| database_name_for(&name));

        if self.directory().find_by_name(&name).await?.is_some() {
            return Err(TenancyError::duplicate("name", name));
        }

        let tenant = Tenant::new(TenantId::generate(), name, database)
            .with_quotas(request.quotas)
            .with_settings(request.settings);
        let tenant = self.directory().insert(tenant).await?;

        if let Err(e) = self.provisioner.provision(&tenant).await {
            warn!(tenant = %tenant.name, error = %e, "provisioning failed; rolling back");
            if let Err(rollback) = self.directory().delete(&tenant.id).await {
                warn!(tenant = %tenant.name, error = %rollback, "rollback of tenant record failed");
            }
            return Err(e);
        }

        info!(tenant = %tenant.name, id = %tenant.id, database = %tenant.database, "tenant provisioned");
        Ok(tenant)
    }

    /// Apply a partial update.
    pub async fn update(&self, id: &TenantId, update: TenantUpdate) -> TenancyResult<Tenant> {
        let mut tenant = self.require(id).await?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(TenancyError::TenantNameMissing);
            }
            tenant.name = name;
        }
        if let Some(quotas) = update.quotas {
            tenant.quotas = quotas;
        }
        if let Some(settings) = update.settings {
            tenant.settings = settings;
        }
        tenant.touch();

        self.directory().update(tenant).await
    }

    /// Mark a tenant inactive and close its connection. Data is kept.
    pub async fn suspend(&self, id: &TenantId) -> TenancyResult<Tenant> {
        let tenant = self.set_status(id, TenantStatus::Inactive).await?;
        self.evict_logged(&tenant).await;
        info!(tenant = %tenant.name, "tenant suspended");
        Ok(tenant)
    }

    /// Mark a tenant active again.
    pub async fn activate(&self, id: &TenantId) -> TenancyResult<Tenant> {
        let tenant = self.set_status(id, TenantStatus::Active).await?;
        info!(tenant = %tenant.name, "tenant activated");
        Ok(tenant)
    }

    /// Delete a tenant.
    ///
    /// The tenant is marked inactive first so no new connection is opened for it,
    /// then its connection is closed and evicted before the record is removed. No
    /// connection outlives its record. If deprovisioning fails the tenant is left
    /// suspended.
    pub async fn delete(&self, id: &TenantId) -> TenancyResult<Tenant> {
        let tenant = self.set_status(id, TenantStatus::Inactive).await?;

        self.evict_logged(&tenant).await;
        self.provisioner.deprovision(&tenant).await?;

        if !self.directory().delete(id).await? {
            return Err(TenancyError::not_found(id.as_str()));
        }

        // A request that read the record before the status flip may have cached
        // a connection since the first eviction.
        self.evict_logged(&tenant).await;

        info!(tenant = %tenant.name, id = %tenant.id, "tenant deleted");
        Ok(tenant)
    }

    /// Get a tenant by id.
    pub async fn get(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        self.directory().find_by_id(id).await
    }

    /// Get a tenant by routing name.
    pub async fn get_by_name(&self, name: &str) -> TenancyResult<Option<Tenant>> {
        self.directory().find_by_name(name).await
    }

    /// List all tenants.
    pub async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        self.directory().list().await
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> TenancyResult<Tenant> {
        let mut tenant = self.require(id).await?;
        if tenant.status == status {
            return Ok(tenant);
        }
        tenant.status = status;
        tenant.touch();
        self.directory().update(tenant).await
    }

    // The pool entry is gone even when close fails.
    async fn evict_logged(&self, tenant: &Tenant) {
        if let Err(e) = self.resolver.evict(&tenant.id).await {
            warn!(tenant = %tenant.name, error = %e, "tenant connection close failed during eviction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryTenantDirectory;
    use crate::testing::{MockConnection, MockFactory};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProvisioner;

    #[async_trait]
    impl TenantProvisioner for FailingProvisioner {
        async fn provision(&self, tenant: &Tenant) -> TenancyResult<()> {
            Err(TenancyError::connection(format!(
                "cannot bootstrap {}",
                tenant.database
            )))
        }
    }

    #[derive(Default)]
    struct CountingProvisioner {
        provisioned: AtomicUsize,
        deprovisioned: AtomicUsize,
    }

    #[async_trait]
    impl TenantProvisioner for CountingProvisioner {
        async fn provision(&self, _tenant: &Tenant) -> TenancyResult<()> {
            self.provisioned.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn deprovision(&self, _tenant: &Tenant) -> TenancyResult<()> {
            self.deprovisioned.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn setup() -> (
        TenantManager<MockConnection>,
        TenantResolver<MockConnection>,
        Arc<MockFactory>,
    ) {
        let factory = Arc::new(MockFactory::new());
        let resolver = TenantResolver::new(Arc::new(InMemoryTenantDirectory::new()), factory.clone());
        (TenantManager::new(resolver.clone()), resolver, factory)
    }

    #[test]
    fn test_database_name_for() {
        assert_eq!(database_name_for("greenwood"), "greenwood_db");
        assert_eq!(database_name_for(" St. Mary's "), "st__mary_s_db");
    }

    #[tokio::test]
    async fn test_provision_and_duplicate_name() {
        let (manager, _, _) = setup();

        let tenant = manager
            .provision(NewTenant::new("greenwood").with_database("gw_db"))
            .await
            .unwrap();
        assert_eq!(tenant.database, "gw_db");
        assert!(tenant.is_active());

        let err = manager.provision(NewTenant::new("greenwood")).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::DuplicateTenant);

        let err = manager
            .provision(NewTenant::new("other").with_database("gw_db"))
            .await
            .unwrap_err();
        assert_eq!(err, TenancyError::duplicate("database", "gw_db"));
    }

    #[tokio::test]
    async fn test_failed_provisioning_rolls_back() {
        let factory = Arc::new(MockFactory::new());
        let resolver: TenantResolver<MockConnection> =
            TenantResolver::new(Arc::new(InMemoryTenantDirectory::new()), factory);
        let manager = TenantManager::with_provisioner(resolver, Arc::new(FailingProvisioner));

        assert!(manager.provision(NewTenant::new("greenwood")).await.is_err());
        assert!(manager.get_by_name("greenwood").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_suspend_evicts_and_blocks_resolution() {
        let (manager, resolver, factory) = setup();
        let tenant = manager.provision(NewTenant::new("greenwood")).await.unwrap();

        let conn = resolver.get_tenant_connection(&tenant.id).await.unwrap();
        manager.suspend(&tenant.id).await.unwrap();

        assert!(!conn.is_open());
        assert!(!resolver.pool().has(&tenant.id));
        assert!(
            resolver
                .get_tenant_connection(&tenant.id)
                .await
                .unwrap_err()
                .is_inactive()
        );

        manager.activate(&tenant.id).await.unwrap();
        resolver.get_tenant_connection(&tenant.id).await.unwrap();
        assert_eq!(factory.create_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_evicts_before_removing_record() {
        let factory = Arc::new(MockFactory::new());
        let provisioner = Arc::new(CountingProvisioner::default());
        let resolver: TenantResolver<MockConnection> =
            TenantResolver::new(Arc::new(InMemoryTenantDirectory::new()), factory.clone());
        let manager = TenantManager::with_provisioner(resolver.clone(), provisioner.clone());

        let tenant = manager
            .provision(NewTenant::new("greenwood").with_database("gw_db"))
            .await
            .unwrap();
        let conn = resolver.get_tenant_connection(&tenant.id).await.unwrap();

        manager.delete(&tenant.id).await.unwrap();

        assert!(!conn.is_open());
        assert_eq!(factory.open_count("gw_db"), 0);
        assert!(resolver.pool().is_empty());
        assert!(manager.get(&tenant.id).await.unwrap().is_none());
        assert_eq!(provisioner.provisioned.load(Ordering::Relaxed), 1);
        assert_eq!(provisioner.deprovisioned.load(Ordering::Relaxed), 1);

        assert!(manager.delete(&tenant.id).await.unwrap_err().is_not_found());
    }

    struct SlowDeprovisioner;

    #[async_trait]
    impl TenantProvisioner for SlowDeprovisioner {
        async fn provision(&self, _tenant: &Tenant) -> TenancyResult<()> {
            Ok(())
        }

        async fn deprovision(&self, _tenant: &Tenant) -> TenancyResult<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_request_during_delete_leaves_no_connection() {
        let factory = Arc::new(MockFactory::new());
        let resolver: TenantResolver<MockConnection> =
            TenantResolver::new(Arc::new(InMemoryTenantDirectory::new()), factory.clone());
        let manager = TenantManager::with_provisioner(resolver.clone(), Arc::new(SlowDeprovisioner));

        let tenant = manager
            .provision(NewTenant::new("greenwood").with_database("gw_db"))
            .await
            .unwrap();
        resolver.get_tenant_connection(&tenant.id).await.unwrap();

        let concurrent = {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                resolver.resolve_by_name("greenwood").await.map(|_| ())
            })
        };

        manager.delete(&tenant.id).await.unwrap();
        let during = concurrent.await.unwrap();

        assert!(during.unwrap_err().is_inactive());
        assert!(manager.get(&tenant.id).await.unwrap().is_none());
        assert!(!resolver.pool().has(&tenant.id));
        assert_eq!(factory.open_count("gw_db"), 0);
    }

    #[tokio::test]
    async fn test_failed_deprovision_leaves_tenant_suspended() {
        struct Refusing;

        #[async_trait]
        impl TenantProvisioner for Refusing {
            async fn provision(&self, _tenant: &Tenant) -> TenancyResult<()> {
                Ok(())
            }

            async fn deprovision(&self, tenant: &Tenant) -> TenancyResult<()> {
                Err(TenancyError::directory(format!("{} is busy", tenant.database)))
            }
        }

        let resolver: TenantResolver<MockConnection> = TenantResolver::new(
            Arc::new(InMemoryTenantDirectory::new()),
            Arc::new(MockFactory::new()),
        );
        let manager = TenantManager::with_provisioner(resolver.clone(), Arc::new(Refusing));
        let tenant = manager.provision(NewTenant::new("greenwood")).await.unwrap();

        assert!(manager.delete(&tenant.id).await.is_err());
        let stored = manager.get(&tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TenantStatus::Inactive);
        assert!(resolver.pool().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_list() {
        let (manager, _, _) = setup();
        let a = manager.provision(NewTenant::new("bravo")).await.unwrap();
        manager.provision(NewTenant::new("alpha")).await.unwrap();

        let updated = manager
            .update(
                &a.id,
                TenantUpdate {
                    settings: Some(serde_json::json!({ "currency": "INR" })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.settings["currency"], "INR");
        assert_eq!(updated.database, "bravo_db");

        let names: Vec<_> = manager
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["alpha", "bravo"]);
    }
}
