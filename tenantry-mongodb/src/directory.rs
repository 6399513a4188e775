//! Tenant directory stored in the global MongoDB database.

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tenantry_core::{
    TenancyConfig, TenancyError, TenancyResult, Tenant, TenantDirectory, TenantId,
};
use tracing::{debug, info};

use crate::config::MongoConfig;
use crate::error::{MongoError, duplicate_index};

/// Collection holding tenant records.
pub const TENANTS_COLLECTION: &str = "tenants";

/// [`TenantDirectory`] backed by the `tenants` collection.
///
/// Unique indexes on `name` and `database` enforce directory uniqueness at the
/// storage level; violations surface as [`TenancyError::Duplicate`].
#[derive(Debug, Clone)]
pub struct MongoTenantDirectory {
    tenants: Collection<Tenant>,
}

impl MongoTenantDirectory {
    /// Use the `tenants` collection of an existing database handle.
    pub fn new(database: &Database) -> Self {
        Self {
            tenants: database.collection(TENANTS_COLLECTION),
        }
    }

    /// Connect to the global database and ensure the directory indexes.
    pub async fn connect(tenancy: &TenancyConfig, config: &MongoConfig) -> TenancyResult<Self> {
        let options = config.client_options(&tenancy.global_uri).await?;
        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;

        let directory = Self::new(&client.database(&tenancy.global_database));
        directory.ensure_indexes().await?;

        info!(database = %tenancy.global_database, "tenant directory ready");
        Ok(directory)
    }

    /// Create the unique indexes on `name` and `database`.
    pub async fn ensure_indexes(&self) -> TenancyResult<()> {
        let unique = |field: &str| {
            let mut keys = Document::new();
            keys.insert(field, 1);
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };

        self.tenants
            .create_indexes([unique("name"), unique("database")], None)
            .await
            .map_err(MongoError::from)?;
        Ok(())
    }

    /// The underlying collection.
    pub fn collection(&self) -> &Collection<Tenant> {
        &self.tenants
    }
}

/// Map a write error, turning unique index violations into `Duplicate`.
fn write_error(err: mongodb::error::Error, tenant: &Tenant) -> TenancyError {
    let err = MongoError::from(err);
    if !err.is_duplicate_key() {
        return err.into();
    }

    let message = err.to_string();
    match duplicate_index(&message) {
        Some(index) if index.starts_with("name") => {
            TenancyError::duplicate("name", tenant.name.clone())
        }
        Some(index) if index.starts_with("database") => {
            TenancyError::duplicate("database", tenant.database.clone())
        }
        _ => TenancyError::duplicate("id", tenant.id.as_str()),
    }
}

#[async_trait]
impl TenantDirectory for MongoTenantDirectory {
    async fn find_by_id(&self, id: &TenantId) -> TenancyResult<Option<Tenant>> {
        debug!(tenant = %id, "directory lookup by id");
        Ok(self
            .tenants
            .find_one(doc! { "_id": id.as_str() }, None)
            .await
            .map_err(MongoError::from)?)
    }

    async fn find_by_name(&self, name: &str) -> TenancyResult<Option<Tenant>> {
        debug!(tenant = %name, "directory lookup by name");
        Ok(self
            .tenants
            .find_one(doc! { "name": name }, None)
            .await
            .map_err(MongoError::from)?)
    }

    async fn insert(&self, tenant: Tenant) -> TenancyResult<Tenant> {
        self.tenants
            .insert_one(&tenant, None)
            .await
            .map_err(|e| write_error(e, &tenant))?;
        Ok(tenant)
    }

    async fn update(&self, mut tenant: Tenant) -> TenancyResult<Tenant> {
        tenant.touch();
        let result = self
            .tenants
            .replace_one(doc! { "_id": tenant.id.as_str() }, &tenant, None)
            .await
            .map_err(|e| write_error(e, &tenant))?;

        if result.matched_count == 0 {
            return Err(TenancyError::not_found(tenant.id.as_str()));
        }
        Ok(tenant)
    }

    async fn delete(&self, id: &TenantId) -> TenancyResult<bool> {
        let result = self
            .tenants
            .delete_one(doc! { "_id": id.as_str() }, None)
            .await
            .map_err(MongoError::from)?;
        Ok(result.deleted_count > 0)
    }

    async fn list(&self) -> TenancyResult<Vec<Tenant>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let cursor = self
            .tenants
            .find(None, options)
            .await
            .map_err(MongoError::from)?;
        Ok(cursor.try_collect().await.map_err(MongoError::from)?)
    }
}
