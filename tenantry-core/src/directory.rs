//! The tenant directory: the persistent registry of tenant records.
//!
//! Implementations live next to their storage engine (see `tenantry-mongodb`).
//! [`InMemoryTenantDirectory`] enforces the same uniqueness rules and is used by
//! tests and embedded deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{Tenant, TenantId};

/// Registry of tenant records.
///
/// Names and logical database ids are unique across the directory.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find a tenant by id.
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>>;

    /// Find a tenant by its routing name.
    async fn find_by_name(&self, name: &str) -> TenancyResult<Option<Tenant>>;

    /// Insert a new tenant, rejecting duplicate names or database ids.
    async fn insert(&self, tenant: Tenant) -> TenancyResult<Tenant>;

    /// Replace an existing tenant record.
    async fn update(&self, tenant: Tenant) -> TenancyResult<Tenant>;

    /// Delete a tenant record. Returns whether a record was removed.
    async fn delete(&self, id: &TenantId) -> TenancyResult<bool>;

    /// List all tenants.
    async fn list(&self) -> TenancyResult<Vec<Tenant>>;
}

/// In-memory tenant directory.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    lookups: AtomicU64,
}

impl InMemoryTenantDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with the given tenants.
    ///
    /// Later entries replace earlier ones with the same id.
    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let directory = Self::new();
        {
            let mut map = directory.tenants.write();
            for tenant in tenants {
                map.insert(tenant.id.clone(), tenant);
            }
        }
        directory
    }

    /// Number of `find_by_*` calls served so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of stored tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Check if the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_unique(
        tenants: &HashMap<TenantId, Tenant>,
        candidate: &Tenant,
    ) -> TenancyResult<()> {
        for existing in tenants.values().filter(|t| t.id != candidate.id) {
            if existing.name == candidate.name {
                return Err(TenancyError::duplicate("name", candidate.name.clone()));
            }
            if existing.database == candidate.database {
                return Err(TenancyError::duplicate(
                    "database",
                    candidate.database.clone(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> TenancyResult<Option<Tenant>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn insert(&self, tenant: Tenant) -> TenancyResult<Tenant> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant.id) {
            return Err(TenancyError::duplicate("id", tenant.id.as_str()));
        }
        Self::check_unique(&tenants, &tenant)?;
        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn update(&self, mut tenant: Tenant) -> TenancyResult<Tenant> {
        let mut tenants = self.tenants.write();
        if !tenants.contains_key(&tenant.id) {
            return Err(TenancyError::not_found(tenant.id.as_str()));
        }
        Self::check_unique(&tenants, &tenant)?;
        tenant.touch();
        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn delete(&self, id: &TenantId) -> TenancyResult<bool> {
        Ok(self.tenants.write().remove(id).is_some())
    }

    async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.read().values().cloned().collect();
        tenants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tenants)
    }
}
